//! Error types for quarry-index.

/// Errors that can occur during indexing and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files or the persisted artifact.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Syntax tree could not be produced. Recoverable: the caller falls
    /// back to a single whole-file span.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Embedding provider error, after retries.
    #[error("embedding error: {0}")]
    Embed(#[from] quarry_embed::EmbedError),

    /// Malformed query filter or parameters. Returned immediately, no
    /// partial work.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Persisted artifact failed its fingerprint/schema check.
    #[error("index artifact corrupt: {0}")]
    Corrupt(String),

    /// Vector tagged with a different provider version than the store.
    #[error("embedding provider mismatch: store has {store}, got {got}")]
    ProviderMismatch { store: String, got: String },

    /// Artifact serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using [`IndexError`].
pub type Result<T> = std::result::Result<T, IndexError>;
