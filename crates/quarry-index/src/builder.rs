//! Index builder: full and incremental construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use quarry_embed::{EmbeddingProvider, embed_with_retry};
use tracing::{debug, info, warn};

use crate::error::{IndexError, Result};
use crate::extract::{extract, whole_file_span};
use crate::index::Index;
use crate::languages::{Lang, detect_language};
use crate::persist;
use crate::span::{Span, SpanId, blake3_hex};
use crate::vector::Embedding;

/// Files larger than this are skipped; generated bundles and data
/// dumps drown the index without helping retrieval.
const MAX_FILE_BYTES: usize = 1_048_576;

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Spans per embedding request.
    pub batch_size: usize,
    /// Concurrent embedding requests in flight.
    pub concurrency: usize,
    /// Retries per batch on transient provider errors.
    pub max_retries: u32,
    /// Where to persist the index artifact; `None` keeps it in memory.
    pub artifact: Option<PathBuf>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            concurrency: 4,
            max_retries: 3,
            artifact: None,
        }
    }
}

/// Outcome of a build or update run.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_deleted: usize,
    pub spans_indexed: usize,
    pub spans_embedded: usize,
    pub duration: Duration,
    pub errors: Vec<BuildError>,
}

/// One per-file or per-batch failure that did not abort the run.
#[derive(Debug, Clone)]
pub struct BuildError {
    pub file: String,
    pub message: String,
}

/// Builds and refreshes [`Index`] instances for one provider.
pub struct IndexBuilder {
    provider: Arc<dyn EmbeddingProvider>,
    config: BuilderConfig,
}

impl IndexBuilder {
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            config: BuilderConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: BuilderConfig) -> Self {
        self.config = config;
        self
    }

    /// Full build: walk `root`, extract, embed, populate, persist.
    ///
    /// Per-file failures land in the report, never abort the run.
    /// A fatal provider error (auth, quota) disables embedding for
    /// the remainder; affected spans stay lexical-only.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures: walking the root or persisting
    /// the artifact.
    pub async fn build(&self, root: &Path) -> Result<(Index, BuildReport)> {
        let start = Instant::now();
        let index = Index::new(root.to_path_buf(), self.provider.tag());
        let mut report = BuildReport::default();
        let mut embedding_down = false;

        let files = walk_files(root);
        report.files_scanned = files.len();
        for (abs, rel) in &files {
            self.index_file(&index, abs, rel, &mut report, &mut embedding_down)
                .await?;
        }

        index.optimize();
        if let Some(artifact) = &self.config.artifact {
            persist::save(&index, artifact)?;
        }
        report.duration = start.elapsed();
        info!(
            root = %root.display(),
            files = report.files_indexed,
            spans = report.spans_indexed,
            embedded = report.spans_embedded,
            errors = report.errors.len(),
            elapsed_ms = report.duration.as_millis(),
            "index built"
        );
        Ok((index, report))
    }

    /// Incremental update for explicitly named files. Paths are
    /// repository-relative. A changed file that no longer exists on
    /// disk is treated as deleted.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures, as [`IndexBuilder::build`].
    pub async fn update(
        &self,
        index: &Index,
        changed: &[String],
        deleted: &[String],
    ) -> Result<BuildReport> {
        let start = Instant::now();
        let mut report = BuildReport::default();
        let mut embedding_down = false;

        for rel in deleted {
            let removed = index.remove_file(rel);
            report.files_deleted += 1;
            debug!(file = rel, spans = removed, "file removed from index");
        }
        for rel in changed {
            report.files_scanned += 1;
            let abs = index.root().join(rel);
            if tokio::fs::metadata(&abs).await.is_err() {
                let removed = index.remove_file(rel);
                report.files_deleted += 1;
                debug!(file = rel, spans = removed, "changed file gone, removed");
                continue;
            }
            self.index_file(index, &abs, rel, &mut report, &mut embedding_down)
                .await?;
        }

        index.optimize();
        if let Some(artifact) = &self.config.artifact {
            persist::save(index, artifact)?;
        }
        report.duration = start.elapsed();
        info!(
            changed = changed.len(),
            deleted = deleted.len(),
            spans = report.spans_indexed,
            errors = report.errors.len(),
            "index updated"
        );
        Ok(report)
    }

    /// Load the persisted artifact if it is usable, then reconcile it
    /// against the working tree: unchanged files (by fingerprint) are
    /// kept as-is, changed and new files re-indexed, vanished files
    /// pruned. An unusable artifact falls back to a full build.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures, as [`IndexBuilder::build`].
    pub async fn load_or_build(&self, root: &Path) -> Result<(Index, BuildReport)> {
        let Some(artifact) = &self.config.artifact else {
            return self.build(root).await;
        };
        let index = match persist::load(artifact, root, &self.provider.tag()) {
            Ok(index) => index,
            Err(e) => {
                match &e {
                    IndexError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                        debug!(path = %artifact.display(), "no artifact, building");
                    }
                    _ => warn!(path = %artifact.display(), error = %e, "artifact unusable, rebuilding"),
                }
                return self.build(root).await;
            }
        };

        let stored = index.fingerprints();
        let files = walk_files(root);
        let mut changed: Vec<String> = Vec::new();
        let mut seen: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for (abs, rel) in &files {
            seen.insert(rel.clone());
            match eligible_source(abs).await {
                Some(source) => {
                    if stored.get(rel) != Some(&blake3_hex(&source)) {
                        changed.push(rel.clone());
                    }
                }
                None => {
                    // Was indexed before but is no longer eligible
                    // (grew too large, turned binary).
                    if stored.contains_key(rel) {
                        changed.push(rel.clone());
                    }
                }
            }
        }
        let deleted: Vec<String> = stored
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();

        if changed.is_empty() && deleted.is_empty() {
            debug!(files = files.len(), "index up to date");
            let report = BuildReport {
                files_scanned: files.len(),
                ..BuildReport::default()
            };
            return Ok((index, report));
        }
        let mut report = self.update(&index, &changed, &deleted).await?;
        report.files_scanned = files.len();
        Ok((index, report))
    }

    async fn index_file(
        &self,
        index: &Index,
        abs: &Path,
        rel: &str,
        report: &mut BuildReport,
        embedding_down: &mut bool,
    ) -> Result<()> {
        let source = match tokio::fs::read(abs).await {
            Ok(bytes) => {
                if bytes.len() > MAX_FILE_BYTES {
                    debug!(file = rel, bytes = bytes.len(), "skipped oversized file");
                    evict_ineligible(index, rel, report);
                    return Ok(());
                }
                match String::from_utf8(bytes) {
                    Ok(s) => s,
                    Err(_) => {
                        debug!(file = rel, "skipped binary file");
                        evict_ineligible(index, rel, report);
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                report.errors.push(BuildError {
                    file: rel.to_string(),
                    message: format!("read failed: {e}"),
                });
                return Ok(());
            }
        };
        let fingerprint = blake3_hex(&source);

        let spans = match detect_language(Path::new(rel)) {
            Some(lang) => match extract(rel, &source, lang) {
                Ok(spans) => spans,
                Err(e) => {
                    warn!(file = rel, error = %e, "parse failed, using whole-file span");
                    report.errors.push(BuildError {
                        file: rel.to_string(),
                        message: e.to_string(),
                    });
                    vec![whole_file_span(rel, &source, Some(lang))]
                }
            },
            None => vec![whole_file_span(rel, &source, None)],
        };

        let vectors = self.embed_spans(&spans, rel, report, embedding_down).await;
        report.spans_indexed += spans.len();
        report.spans_embedded += vectors.len();
        index.replace_file(rel, fingerprint, spans, vectors)?;
        report.files_indexed += 1;
        debug!(file = rel, "file indexed");
        Ok(())
    }

    /// Embed span texts in batches through a bounded worker pool.
    /// Vectors attach to spans by explicit id, never by position
    /// across batches. A failed batch costs only its own vectors.
    async fn embed_spans(
        &self,
        spans: &[Span],
        rel: &str,
        report: &mut BuildReport,
        embedding_down: &mut bool,
    ) -> Vec<(SpanId, Embedding)> {
        if *embedding_down || spans.is_empty() {
            return vec![];
        }
        let tag = self.provider.tag();
        let batches: Vec<Vec<(SpanId, String)>> = spans
            .chunks(self.config.batch_size.max(1))
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|span| (span.id.clone(), embedding_text(span)))
                    .collect()
            })
            .collect();

        let max_retries = self.config.max_retries;
        let mut results = futures::stream::iter(batches.into_iter().map(|batch| {
            let provider = Arc::clone(&self.provider);
            async move {
                let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
                let outcome = embed_with_retry(provider.as_ref(), texts, max_retries).await;
                (batch, outcome)
            }
        }))
        .buffer_unordered(self.config.concurrency.max(1));

        let mut out: Vec<(SpanId, Embedding)> = Vec::with_capacity(spans.len());
        while let Some((batch, outcome)) = results.next().await {
            match outcome {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for ((id, _), vector) in batch.into_iter().zip(vectors) {
                        out.push((
                            id,
                            Embedding {
                                tag: tag.clone(),
                                vector,
                            },
                        ));
                    }
                }
                Ok(vectors) => {
                    report.errors.push(BuildError {
                        file: rel.to_string(),
                        message: format!(
                            "embedding count mismatch: sent {}, got {}",
                            batch.len(),
                            vectors.len()
                        ),
                    });
                }
                Err(e) => {
                    if !e.is_transient() {
                        warn!(error = %e, "fatal provider error, embedding disabled for this run");
                        *embedding_down = true;
                    }
                    report.errors.push(BuildError {
                        file: rel.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        out
    }
}

/// A previously indexed file that stops passing the eligibility gates
/// must not keep its old state: drop its spans, vectors, and
/// fingerprint so nothing stale survives the skip.
fn evict_ineligible(index: &Index, rel: &str, report: &mut BuildReport) {
    let removed = index.remove_file(rel);
    if removed > 0 {
        report.files_deleted += 1;
        debug!(file = rel, spans = removed, "ineligible file evicted");
    }
}

/// Text sent to the provider: a path and scope header prepended to
/// the span body, so the vector carries location context.
fn embedding_text(span: &Span) -> String {
    let lang = span.language.map_or("text", Lang::id);
    format!("{lang} {file}\n{id}\n{body}", file = span.file_path, id = span.id, body = span.text)
}

/// Eligible files under `root`, gitignore-aware, sorted by relative
/// path so runs are deterministic.
fn walk_files(root: &Path) -> Vec<(PathBuf, String)> {
    let mut files = Vec::new();
    for entry in ignore::WalkBuilder::new(root).build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "walk error, entry skipped");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let abs = entry.into_path();
        let Ok(rel) = abs.strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        files.push((abs, rel));
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    files
}

/// Read a file if it passes the size and UTF-8 gates used for
/// indexing; `None` means the file is skipped, not an error.
async fn eligible_source(path: &Path) -> Option<String> {
    let bytes = tokio::fs::read(path).await.ok()?;
    if bytes.len() > MAX_FILE_BYTES {
        return None;
    }
    String::from_utf8(bytes).ok()
}
