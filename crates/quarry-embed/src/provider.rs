//! The provider call contract.

use std::future::Future;
use std::pin::Pin;

use crate::error::EmbedError;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Converts text into fixed-length vectors.
///
/// The contract the index engine relies on:
///
/// - `embed_batch` returns exactly one vector per input text, in input
///   order, or an error for the whole batch. Callers attribute vectors
///   to their texts by position *within one call* only.
/// - `tag()` identifies provider + model. Vectors produced under
///   different tags are not comparable; the vector store rejects them.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] for the whole batch; partial results are
    /// never produced.
    fn embed_batch(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>, EmbedError>>;

    /// Provider/model version tag, e.g. `openai/text-embedding-3-small`.
    fn tag(&self) -> String;
}
