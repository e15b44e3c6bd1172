//! On-disk index artifact: one JSON file per repository snapshot.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::index::Index;
use crate::span::{Span, SpanId};
use crate::vector::Embedding;

pub(crate) const SCHEMA_VERSION: u32 = 1;

/// Serialized index state. The ANN graph is deliberately absent; it
/// is rebuilt from the vectors on load.
#[derive(Serialize, Deserialize)]
struct Artifact {
    schema_version: u32,
    root: String,
    provider_tag: String,
    fingerprints: BTreeMap<String, String>,
    spans: Vec<Span>,
    vectors: Vec<(SpanId, Vec<f32>)>,
}

/// Write the index to `path` atomically: serialize to a sibling temp
/// file, then rename over the target.
///
/// # Errors
///
/// [`IndexError::Io`] on filesystem failure, [`IndexError::Json`] on
/// serialization failure.
pub fn save(index: &Index, path: &Path) -> Result<()> {
    let artifact = {
        let inner = index.read();
        Artifact {
            schema_version: SCHEMA_VERSION,
            root: index.root().display().to_string(),
            provider_tag: index.provider_tag().to_string(),
            fingerprints: inner.fingerprints.clone(),
            spans: inner.spans.values().cloned().collect(),
            vectors: inner
                .vectors
                .records()
                .map(|(id, v)| (id.clone(), v.clone()))
                .collect(),
        }
    };
    let payload = serde_json::to_vec(&artifact)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &payload)?;
    std::fs::rename(&tmp, path)?;
    tracing::debug!(path = %path.display(), spans = artifact.spans.len(), "index artifact saved");
    Ok(())
}

/// Load an index from `path`, verifying schema version, provider tag,
/// and repository root.
///
/// # Errors
///
/// [`IndexError::Io`] if the file cannot be read;
/// [`IndexError::Corrupt`] if it fails parsing or any check, in which
/// case the caller should rebuild.
pub fn load(path: &Path, root: &Path, provider_tag: &str) -> Result<Index> {
    let payload = std::fs::read(path)?;
    let artifact: Artifact = serde_json::from_slice(&payload)
        .map_err(|e| IndexError::Corrupt(format!("unreadable artifact: {e}")))?;

    if artifact.schema_version != SCHEMA_VERSION {
        return Err(IndexError::Corrupt(format!(
            "schema version {} (expected {SCHEMA_VERSION})",
            artifact.schema_version
        )));
    }
    if artifact.provider_tag != provider_tag {
        return Err(IndexError::Corrupt(format!(
            "provider tag {} (expected {provider_tag})",
            artifact.provider_tag
        )));
    }
    let expected_root = root.display().to_string();
    if artifact.root != expected_root {
        return Err(IndexError::Corrupt(format!(
            "root {} (expected {expected_root})",
            artifact.root
        )));
    }

    let index = Index::new(root.to_path_buf(), artifact.provider_tag.clone());
    {
        let mut inner = index.write();
        for span in artifact.spans {
            inner.lexical.insert(&span);
            inner.spans.insert(span.id.clone(), span);
        }
        for (id, vector) in artifact.vectors {
            inner.vectors.upsert(
                id,
                Embedding {
                    tag: artifact.provider_tag.clone(),
                    vector,
                },
            )?;
        }
        inner.fingerprints = artifact.fingerprints;
        inner.vectors.optimize();
    }
    tracing::debug!(path = %path.display(), spans = index.span_count(), "index artifact loaded");
    Ok(index)
}
