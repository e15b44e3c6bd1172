//! Embedding provider boundary for the Quarry code index.
//!
//! The index engine depends on embeddings only through the
//! [`EmbeddingProvider`] trait: a batch of texts in, a batch of vectors
//! out, attributed by order within one call. Providers carry a tag
//! (provider name + model) so vectors from different models are never
//! compared against each other.

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod openai;
pub mod provider;
pub mod retry;

pub use error::{EmbedError, Result};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockEmbedder;
pub use openai::OpenAiEmbedder;
pub use provider::EmbeddingProvider;
pub use retry::embed_with_retry;
