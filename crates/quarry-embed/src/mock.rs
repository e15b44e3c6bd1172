//! Test-only deterministic embedder.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::EmbedError;
use crate::provider::{BoxFuture, EmbeddingProvider};

/// Deterministic bag-of-tokens embedder for tests.
///
/// Each alphanumeric token hashes (blake3) to a bucket of the output
/// vector; the vector is L2-normalized. Texts sharing tokens get real
/// cosine similarity, so retrieval tests exercise actual ranking
/// behavior without a network. Failure injection covers the retry
/// paths: `failing_times` yields transient errors for the first N
/// calls, `failing_fatal` yields an auth error on every call.
#[derive(Debug)]
pub struct MockEmbedder {
    dim: usize,
    fail_transient: AtomicU32,
    fail_fatal: bool,
    calls: AtomicU32,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            fail_transient: AtomicU32::new(0),
            fail_fatal: false,
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the first `n` calls with a transient error.
    #[must_use]
    pub fn failing_times(self, n: u32) -> Self {
        self.fail_transient.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every call with a fatal auth error.
    #[must_use]
    pub fn failing_fatal(mut self) -> Self {
        self.fail_fatal = true;
        self
    }

    /// Number of `embed_batch` calls observed.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Embed a single text synchronously. Test convenience.
    #[must_use]
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        hash_embed(text, self.dim)
    }
}

fn hash_embed(text: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    for token in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if token.is_empty() {
            continue;
        }
        let hash = blake3::hash(token.to_lowercase().as_bytes());
        let bucket = u64::from_le_bytes(hash.as_bytes()[..8].try_into().unwrap_or_default());
        #[allow(clippy::cast_possible_truncation)]
        let idx = (bucket % dim as u64) as usize;
        v[idx] += 1.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

impl EmbeddingProvider for MockEmbedder {
    fn embed_batch(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>, EmbedError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.fail_fatal {
                return Err(EmbedError::Auth("mock auth failure".into()));
            }
            let remaining = self.fail_transient.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_transient.store(remaining - 1, Ordering::SeqCst);
                return Err(EmbedError::RateLimited { retry_after: None });
            }

            Ok(texts.iter().map(|t| hash_embed(t, self.dim)).collect())
        })
    }

    fn tag(&self) -> String {
        format!("mock/hash-{}", self.dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn batch_preserves_order_and_count() {
        let m = MockEmbedder::new(16);
        let out = m
            .embed_batch(vec!["alpha".into(), "beta".into(), "gamma".into()])
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], m.embed_one("alpha"));
        assert_eq!(out[2], m.embed_one("gamma"));
    }

    #[test]
    fn identical_text_identical_vector() {
        let m = MockEmbedder::new(32);
        assert_eq!(m.embed_one("fn foo() {}"), m.embed_one("fn foo() {}"));
    }

    #[test]
    fn shared_tokens_raise_similarity() {
        let m = MockEmbedder::new(64);
        let foo = m.embed_one("fn parse_config(path) { read(path) }");
        let near = m.embed_one("parse_config");
        let far = m.embed_one("unrelated words entirely");
        assert!(cosine(&foo, &near) > cosine(&foo, &far));
    }

    #[test]
    fn vectors_are_unit_norm() {
        let m = MockEmbedder::new(16);
        let v = m.embed_one("some tokens here");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let m = MockEmbedder::new(8);
        assert_eq!(m.embed_one(""), vec![0.0; 8]);
    }

    #[tokio::test]
    async fn transient_failures_then_recover() {
        let m = MockEmbedder::new(8).failing_times(1);
        assert!(m.embed_batch(vec!["x".into()]).await.is_err());
        assert!(m.embed_batch(vec!["x".into()]).await.is_ok());
        assert_eq!(m.calls(), 2);
    }

    #[test]
    fn tag_reflects_dimension() {
        assert_eq!(MockEmbedder::new(384).tag(), "mock/hash-384");
    }
}
