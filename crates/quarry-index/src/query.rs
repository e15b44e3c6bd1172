//! Retrieval orchestrator: fused vector + lexical search.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use quarry_embed::{EmbeddingProvider, embed_with_retry};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::index::Index;
use crate::languages::Lang;
use crate::span::{Span, SpanId, SpanKind};
use crate::vector::Embedding;

/// Candidate pool multiplier applied to `k` before fusion, so
/// filtering and de-duplication have slack to draw from.
const OVERSAMPLE: usize = 4;

/// Retry budget for embedding the query text. Smaller than the
/// builder's: a query caller is waiting.
const QUERY_EMBED_RETRIES: u32 = 2;

/// Relative weight of each retrieval signal plus the bonus applied
/// when both signals agree on a candidate.
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub vector: f32,
    pub lexical: f32,
    pub consensus_bonus: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            lexical: 0.4,
            consensus_bonus: 0.1,
        }
    }
}

/// Which retrieval signal produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Vector,
    Lexical,
}

/// Optional restrictions on the result set. Validated up front; an
/// unknown language tag or malformed glob fails the whole query.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Glob matched against repository-relative file paths.
    pub path_glob: Option<String>,
    /// Language tag, e.g. `rust` or `python`.
    pub language: Option<String>,
    pub kind: Option<SpanKind>,
}

impl SearchFilters {
    fn compile(&self) -> Result<CompiledFilters> {
        let glob = self
            .path_glob
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| IndexError::InvalidQuery(format!("bad path glob: {e}")))?;
        let language = self
            .language
            .as_deref()
            .map(|tag| {
                Lang::from_id(tag)
                    .ok_or_else(|| IndexError::InvalidQuery(format!("unknown language: {tag}")))
            })
            .transpose()?;
        Ok(CompiledFilters {
            glob,
            language,
            kind: self.kind,
        })
    }
}

struct CompiledFilters {
    glob: Option<glob::Pattern>,
    language: Option<Lang>,
    kind: Option<SpanKind>,
}

impl CompiledFilters {
    fn accepts(&self, span: &Span) -> bool {
        if let Some(glob) = &self.glob {
            if !glob.matches(&span.file_path) {
                return false;
            }
        }
        if let Some(lang) = self.language {
            if span.language != Some(lang) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if span.kind != kind {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Maximum results returned.
    pub k: usize,
    /// When a parent and its child both qualify, keep the parent
    /// (broader context) instead of the default smaller span.
    pub prefer_parent: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            k: 8,
            prefer_parent: false,
        }
    }
}

/// One retrieved span with its fused score and the signals that
/// produced it.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub id: SpanId,
    pub score: f32,
    pub matched_by: Vec<Signal>,
}

struct Candidate {
    id: SpanId,
    score: f32,
    matched_by: Vec<Signal>,
    dropped: bool,
}

/// Runs both retrieval signals concurrently and fuses their rankings.
pub struct Retriever {
    index: Arc<Index>,
    provider: Arc<dyn EmbeddingProvider>,
    weights: FusionWeights,
}

impl Retriever {
    #[must_use]
    pub fn new(index: Arc<Index>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index,
            provider,
            weights: FusionWeights::default(),
        }
    }

    #[must_use]
    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.weights = weights;
        self
    }

    #[must_use]
    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    /// Retrieve up to `opts.k` spans relevant to `text`.
    ///
    /// Scores from each signal are min-max normalized over the
    /// candidate pool, then fused by weighted sum; candidates both
    /// signals found get a consensus bonus. Results are totally
    /// ordered (score descending, span id ascending), so identical
    /// index state and input yield identical output. Fewer than `k`
    /// qualifying candidates are returned as-is, never padded.
    ///
    /// # Errors
    ///
    /// [`IndexError::InvalidQuery`] for a malformed filter, before any
    /// retrieval work; [`IndexError::Embed`] if embedding the query
    /// fails.
    pub async fn query(
        &self,
        text: &str,
        filters: &SearchFilters,
        opts: &QueryOptions,
    ) -> Result<Vec<QueryResult>> {
        let compiled = filters.compile()?;
        if opts.k == 0 || self.index.is_empty() {
            return Ok(vec![]);
        }
        let pool = opts.k.saturating_mul(OVERSAMPLE);

        let vector_fut = async {
            // No vectors means nothing to rank; skip the provider call.
            if !self.index.has_vectors() {
                return Ok::<_, IndexError>(vec![]);
            }
            let vector = embed_with_retry(
                self.provider.as_ref(),
                vec![text.to_string()],
                QUERY_EMBED_RETRIES,
            )
            .await
            .map_err(IndexError::Embed)?
            .into_iter()
            .next()
                .ok_or_else(|| {
                    IndexError::Embed(quarry_embed::EmbedError::EmptyResponse {
                        provider: self.provider.tag(),
                    })
                })?;
            let embedding = Embedding {
                tag: self.provider.tag(),
                vector,
            };
            self.index.vector_query(&embedding, pool)
        };
        let lexical_fut = async { self.index.lexical_search(text, pool) };

        let (vector_hits, lexical_hits) = futures::join!(vector_fut, lexical_fut);
        let vector_hits = normalize(vector_hits?);
        let lexical_hits = normalize(lexical_hits);

        let mut fused: BTreeMap<SpanId, (Option<f32>, Option<f32>)> = BTreeMap::new();
        for (id, s) in vector_hits {
            fused.entry(id).or_default().0 = Some(s);
        }
        for (id, s) in lexical_hits {
            fused.entry(id).or_default().1 = Some(s);
        }

        let mut candidates: Vec<Candidate> = Vec::with_capacity(fused.len());
        for (id, (v, l)) in fused {
            let Some(span) = self.index.get_span(&id) else {
                continue;
            };
            if !compiled.accepts(&span) {
                continue;
            }
            let mut matched_by = Vec::with_capacity(2);
            let mut score = 0.0;
            if let Some(v) = v {
                score += self.weights.vector * v;
                matched_by.push(Signal::Vector);
            }
            if let Some(l) = l {
                score += self.weights.lexical * l;
                matched_by.push(Signal::Lexical);
            }
            if matched_by.len() == 2 {
                score += self.weights.consensus_bonus;
            }
            candidates.push(Candidate {
                id,
                score,
                matched_by,
                dropped: false,
            });
        }

        self.dedup_nested(&mut candidates, opts.prefer_parent);

        let mut out: Vec<QueryResult> = candidates
            .into_iter()
            .filter(|c| !c.dropped)
            .map(|c| QueryResult {
                id: c.id,
                score: c.score,
                matched_by: c.matched_by,
            })
            .collect();
        out.sort_unstable_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        out.truncate(opts.k);
        Ok(out)
    }

    /// When a candidate and one of its ancestors both qualify, keep
    /// one of the pair: the child (smaller, more precise) by default,
    /// the ancestor when `prefer_parent` is set. The survivor takes
    /// the better score and the union of signals.
    fn dedup_nested(&self, candidates: &mut [Candidate], prefer_parent: bool) {
        let positions: HashMap<SpanId, usize> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();

        for child_pos in 0..candidates.len() {
            let mut ancestor = self
                .index
                .get_span(&candidates[child_pos].id)
                .and_then(|s| s.parent);
            while let Some(pid) = ancestor {
                if let Some(&parent_pos) = positions.get(&pid) {
                    let merged_score =
                        candidates[child_pos].score.max(candidates[parent_pos].score);
                    let (keep, drop) = if prefer_parent {
                        (parent_pos, child_pos)
                    } else {
                        (child_pos, parent_pos)
                    };
                    let dropped_signals = candidates[drop].matched_by.clone();
                    candidates[drop].dropped = true;
                    let kept = &mut candidates[keep];
                    kept.score = merged_score;
                    for s in dropped_signals {
                        if !kept.matched_by.contains(&s) {
                            kept.matched_by.push(s);
                        }
                    }
                }
                ancestor = self.index.get_span(&pid).and_then(|s| s.parent);
            }
        }
    }
}

/// Min-max normalize scores to [0, 1]. A single candidate, or a pool
/// where every score is equal, normalizes to 1.0.
fn normalize(hits: Vec<(SpanId, f32)>) -> Vec<(SpanId, f32)> {
    let Some(max) = hits.iter().map(|(_, s)| *s).reduce(f32::max) else {
        return hits;
    };
    let min = hits.iter().map(|(_, s)| *s).fold(max, f32::min);
    let range = max - min;
    hits.into_iter()
        .map(|(id, s)| {
            let n = if range > f32::EPSILON {
                (s - min) / range
            } else {
                1.0
            };
            (id, n)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_embed::MockEmbedder;
    use std::path::PathBuf;

    const DIM: usize = 64;

    fn setup() -> (Arc<Index>, Arc<MockEmbedder>) {
        let provider = Arc::new(MockEmbedder::new(DIM));
        let index = Arc::new(Index::new(PathBuf::from("/repo"), provider.tag()));
        (index, provider)
    }

    fn add_span(
        index: &Index,
        provider: &MockEmbedder,
        file: &str,
        path: &str,
        text: &str,
        parent: Option<&str>,
    ) {
        let span = Span {
            id: SpanId::new(file, path),
            file_path: file.to_string(),
            byte_range: (0, text.len()),
            line_range: (1, 1),
            kind: SpanKind::Function,
            text: text.to_string(),
            parent: parent.map(|p| SpanId::new(file, p)),
            language: crate::languages::detect_language(std::path::Path::new(file)),
            content_hash: String::new(),
        };
        let embedding = Embedding {
            tag: provider.tag(),
            vector: provider.embed_one(text),
        };
        let id = span.id.clone();
        append_file(index, file, vec![span], vec![(id, embedding)]);
    }

    // replace_file swaps the whole file, so tests that add spans one
    // by one to the same file must merge with what is already there.
    fn append_file(
        index: &Index,
        file: &str,
        new_spans: Vec<Span>,
        new_vectors: Vec<(SpanId, Embedding)>,
    ) {
        let mut inner = index_spans_of(index, file);
        let mut vectors = index_vectors_of(index, file);
        inner.extend(new_spans);
        vectors.extend(new_vectors);
        index
            .replace_file(file, "fp".into(), inner, vectors)
            .unwrap();
    }

    fn index_spans_of(index: &Index, file: &str) -> Vec<Span> {
        let guard = index.read();
        guard
            .spans
            .values()
            .filter(|s| s.file_path == file)
            .cloned()
            .collect()
    }

    fn index_vectors_of(index: &Index, file: &str) -> Vec<(SpanId, Embedding)> {
        let guard = index.read();
        let tag = guard.vectors.tag().to_string();
        guard
            .vectors
            .records()
            .filter(|(id, _)| id.owned_by(file))
            .map(|(id, v)| {
                (
                    id.clone(),
                    Embedding {
                        tag: tag.clone(),
                        vector: v.clone(),
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn empty_index_yields_empty() {
        let (index, provider) = setup();
        let r = Retriever::new(index, provider);
        let out = r
            .query("anything", &SearchFilters::default(), &QueryOptions::default())
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn k_zero_yields_empty() {
        let (index, provider) = setup();
        add_span(&index, &provider, "a.rs", "foo", "fn foo() {}", None);
        let r = Retriever::new(index, provider);
        let opts = QueryOptions {
            k: 0,
            ..QueryOptions::default()
        };
        let out = r
            .query("foo", &SearchFilters::default(), &opts)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn exact_symbol_ranks_first() {
        let (index, provider) = setup();
        add_span(
            &index,
            &provider,
            "src/a.rs",
            "foo",
            "fn foo() { compute_totals(); }",
            None,
        );
        add_span(
            &index,
            &provider,
            "src/b.rs",
            "bar",
            "fn bar() { render_page(); }",
            None,
        );
        let r = Retriever::new(index, provider);
        let out = r
            .query("foo", &SearchFilters::default(), &QueryOptions::default())
            .await
            .unwrap();
        assert!(!out.is_empty());
        assert_eq!(out[0].id, SpanId::new("src/a.rs", "foo"));
    }

    #[tokio::test]
    async fn consensus_hit_reports_both_signals() {
        let (index, provider) = setup();
        add_span(
            &index,
            &provider,
            "src/a.rs",
            "parse_config",
            "fn parse_config() { toml::from_str(raw) }",
            None,
        );
        let r = Retriever::new(index, provider);
        let out = r
            .query(
                "parse_config",
                &SearchFilters::default(),
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].matched_by.contains(&Signal::Vector));
        assert!(out[0].matched_by.contains(&Signal::Lexical));
    }

    #[tokio::test]
    async fn bad_glob_fails_before_any_work() {
        let (index, provider) = setup();
        add_span(&index, &provider, "a.rs", "foo", "fn foo() {}", None);
        let calls_before = provider.calls();
        let r = Retriever::new(index, Arc::clone(&provider) as Arc<dyn EmbeddingProvider>);
        let filters = SearchFilters {
            path_glob: Some("[".into()),
            ..SearchFilters::default()
        };
        let err = r
            .query("foo", &filters, &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidQuery(_)));
        assert_eq!(provider.calls(), calls_before);
    }

    #[tokio::test]
    async fn unknown_language_filter_is_invalid() {
        let (index, provider) = setup();
        add_span(&index, &provider, "a.rs", "foo", "fn foo() {}", None);
        let r = Retriever::new(index, provider);
        let filters = SearchFilters {
            language: Some("cobol".into()),
            ..SearchFilters::default()
        };
        let err = r
            .query("foo", &filters, &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn path_glob_restricts_results() {
        let (index, provider) = setup();
        add_span(&index, &provider, "src/a.rs", "handler", "fn handler() {}", None);
        add_span(
            &index,
            &provider,
            "tests/a.rs",
            "handler",
            "fn handler() {}",
            None,
        );
        let r = Retriever::new(index, provider);
        let filters = SearchFilters {
            path_glob: Some("src/**".into()),
            ..SearchFilters::default()
        };
        let out = r
            .query("handler", &filters, &QueryOptions::default())
            .await
            .unwrap();
        assert!(!out.is_empty());
        assert!(out.iter().all(|r| r.id.file_path().starts_with("src/")));
    }

    #[tokio::test]
    async fn nested_dedup_keeps_child_by_default() {
        let (index, provider) = setup();
        add_span(
            &index,
            &provider,
            "a.rs",
            "outer",
            "fn outer() { helper_logic(); inner(); }",
            None,
        );
        add_span(
            &index,
            &provider,
            "a.rs",
            "outer.inner",
            "fn inner() { helper_logic(); }",
            Some("outer"),
        );
        let r = Retriever::new(index, provider);
        let out = r
            .query(
                "helper_logic",
                &SearchFilters::default(),
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"a.rs::outer.inner"));
        assert!(!ids.contains(&"a.rs::outer"));
    }

    #[tokio::test]
    async fn prefer_parent_keeps_the_ancestor() {
        let (index, provider) = setup();
        add_span(
            &index,
            &provider,
            "a.rs",
            "outer",
            "fn outer() { helper_logic(); inner(); }",
            None,
        );
        add_span(
            &index,
            &provider,
            "a.rs",
            "outer.inner",
            "fn inner() { helper_logic(); }",
            Some("outer"),
        );
        let r = Retriever::new(index, provider);
        let opts = QueryOptions {
            prefer_parent: true,
            ..QueryOptions::default()
        };
        let out = r
            .query("helper_logic", &SearchFilters::default(), &opts)
            .await
            .unwrap();
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"a.rs::outer"));
        assert!(!ids.contains(&"a.rs::outer.inner"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_embed_failure_is_retried_during_query() {
        let (index, provider) = setup();
        add_span(&index, &provider, "a.rs", "foo", "fn foo() { shared_token(); }", None);

        // First provider call fails with a rate limit; the retry must
        // absorb it instead of failing the query.
        let flaky = Arc::new(MockEmbedder::new(DIM).failing_times(1));
        let r = Retriever::new(index, Arc::clone(&flaky) as Arc<dyn EmbeddingProvider>);
        let out = r
            .query("foo", &SearchFilters::default(), &QueryOptions::default())
            .await
            .unwrap();
        assert!(!out.is_empty());
        assert!(flaky.calls() >= 2);
    }

    #[tokio::test]
    async fn query_is_deterministic() {
        let (index, provider) = setup();
        for (file, name) in [("a.rs", "alpha"), ("b.rs", "beta"), ("c.rs", "gamma")] {
            add_span(
                &index,
                &provider,
                file,
                name,
                &format!("fn {name}() {{ shared_token(); }}"),
                None,
            );
        }
        let r = Retriever::new(index, provider);
        let a = r
            .query(
                "shared_token",
                &SearchFilters::default(),
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        let b = r
            .query(
                "shared_token",
                &SearchFilters::default(),
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        let ids_a: Vec<_> = a.iter().map(|r| r.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn normalize_single_and_equal_scores_to_one() {
        let one = normalize(vec![(SpanId::new("a.rs", "f"), 0.3)]);
        assert!((one[0].1 - 1.0).abs() < f32::EPSILON);
        let eq = normalize(vec![
            (SpanId::new("a.rs", "f"), 0.5),
            (SpanId::new("b.rs", "f"), 0.5),
        ]);
        assert!(eq.iter().all(|(_, s)| (*s - 1.0).abs() < f32::EPSILON));
    }

    #[test]
    fn normalize_spreads_to_unit_interval() {
        let out = normalize(vec![
            (SpanId::new("a.rs", "f"), 2.0),
            (SpanId::new("b.rs", "f"), 4.0),
            (SpanId::new("c.rs", "f"), 6.0),
        ]);
        assert!((out[0].1 - 0.0).abs() < f32::EPSILON);
        assert!((out[1].1 - 0.5).abs() < f32::EPSILON);
        assert!((out[2].1 - 1.0).abs() < f32::EPSILON);
    }
}
