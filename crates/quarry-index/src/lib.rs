//! Code index and retrieval engine for repository snapshots.
//!
//! Source files are chunked into structurally addressed spans via
//! tree-sitter, embedded through a [`quarry_embed::EmbeddingProvider`],
//! and served from two complementary indexes: a cosine-similarity
//! vector store and a fuzzy lexical index. The [`Retriever`] fuses
//! both signals into one deterministic ranking; the [`IndexBuilder`]
//! handles full builds, incremental updates, and the on-disk artifact.

mod builder;
mod error;
mod extract;
mod hnsw;
mod index;
mod languages;
mod lexical;
mod persist;
mod query;
mod span;
mod vector;

pub use builder::{BuildError, BuildReport, BuilderConfig, IndexBuilder};
pub use error::{IndexError, Result};
pub use extract::{extract, whole_file_span};
pub use index::Index;
pub use languages::{Lang, detect_language};
pub use lexical::LexicalIndex;
pub use persist::{load, save};
pub use query::{FusionWeights, QueryOptions, QueryResult, Retriever, SearchFilters, Signal};
pub use span::{Span, SpanId, SpanKind};
pub use vector::{Embedding, VectorStore};
