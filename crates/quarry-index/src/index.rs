//! The index context object: spans, vectors, and the lexical index
//! behind one single-writer / multi-reader lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::lexical::LexicalIndex;
use crate::span::{Span, SpanId};
use crate::vector::{Embedding, VectorStore};

pub(crate) struct Inner {
    pub(crate) spans: BTreeMap<SpanId, Span>,
    pub(crate) vectors: VectorStore,
    pub(crate) lexical: LexicalIndex,
    /// Repository-relative file path → blake3 hex of file contents.
    pub(crate) fingerprints: BTreeMap<String, String>,
}

/// One repository snapshot's searchable state.
///
/// Explicitly passed, never global. Readers see a consistent snapshot:
/// every mutation for one file lands under a single write-lock
/// acquisition, so a query observes a file either fully indexed or not
/// at all, never half-swapped.
pub struct Index {
    root: PathBuf,
    provider_tag: String,
    inner: RwLock<Inner>,
}

impl Index {
    #[must_use]
    pub fn new(root: PathBuf, provider_tag: String) -> Self {
        let vectors = VectorStore::new(provider_tag.clone());
        Self {
            root,
            provider_tag,
            inner: RwLock::new(Inner {
                spans: BTreeMap::new(),
                vectors,
                lexical: LexicalIndex::new(),
                fingerprints: BTreeMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn provider_tag(&self) -> &str {
        &self.provider_tag
    }

    // A panic while holding the lock cannot leave a torn file: the
    // write path only mutates after staging, so recovering the
    // poisoned guard is sound.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn span_count(&self) -> usize {
        self.read().spans.len()
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.read().fingerprints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().spans.is_empty()
    }

    #[must_use]
    pub fn get_span(&self, id: &SpanId) -> Option<Span> {
        self.read().spans.get(id).cloned()
    }

    /// Current file fingerprints, for working-tree diffing.
    #[must_use]
    pub fn fingerprints(&self) -> BTreeMap<String, String> {
        self.read().fingerprints.clone()
    }

    /// Swap in the freshly staged spans and vectors for one file.
    /// Deletes everything the file previously owned first; one
    /// write-lock acquisition covers the whole delete+insert.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::ProviderMismatch`] if any staged
    /// embedding carries a foreign provider tag.
    pub(crate) fn replace_file(
        &self,
        file_path: &str,
        fingerprint: String,
        spans: Vec<Span>,
        vectors: Vec<(SpanId, Embedding)>,
    ) -> Result<()> {
        let mut inner = self.write();
        inner.spans.retain(|id, _| !id.owned_by(file_path));
        inner.vectors.delete_file(file_path);
        inner.lexical.remove_file(file_path);

        for span in spans {
            inner.lexical.insert(&span);
            inner.spans.insert(span.id.clone(), span);
        }
        for (id, embedding) in vectors {
            inner.vectors.upsert(id, embedding)?;
        }
        inner.fingerprints.insert(file_path.to_string(), fingerprint);
        Ok(())
    }

    /// Drop every span, vector, and fingerprint owned by `file_path`.
    /// Returns the number of spans removed.
    pub(crate) fn remove_file(&self, file_path: &str) -> usize {
        let mut inner = self.write();
        let before = inner.spans.len();
        inner.spans.retain(|id, _| !id.owned_by(file_path));
        inner.vectors.delete_file(file_path);
        inner.lexical.remove_file(file_path);
        inner.fingerprints.remove(file_path);
        before - inner.spans.len()
    }

    /// Rebuild the ANN structure after a batch of mutations.
    pub fn optimize(&self) {
        self.write().vectors.optimize();
    }

    /// K nearest spans to `embedding` by cosine similarity.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::ProviderMismatch`] for an
    /// embedding from a different provider version.
    pub fn vector_query(&self, embedding: &Embedding, k: usize) -> Result<Vec<(SpanId, f32)>> {
        self.read().vectors.query(embedding, k)
    }

    #[must_use]
    pub fn lexical_search(&self, query: &str, k: usize) -> Vec<(SpanId, f32)> {
        self.read().lexical.search(query, k)
    }

    /// Whether any span currently has a vector. Lets the orchestrator
    /// skip embedding the query when nothing could match.
    #[must_use]
    pub fn has_vectors(&self) -> bool {
        !self.read().vectors.is_empty()
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("Index")
            .field("root", &self.root)
            .field("provider_tag", &self.provider_tag)
            .field("spans", &inner.spans.len())
            .field("files", &inner.fingerprints.len())
            .finish_non_exhaustive()
    }
}
