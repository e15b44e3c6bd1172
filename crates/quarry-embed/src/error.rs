//! Error types for embedding providers.

/// Errors returned by an embedding provider.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// HTTP transport failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider returned 429. Carries the `Retry-After` hint in
    /// seconds when the server sent one.
    #[error("rate limited")]
    RateLimited { retry_after: Option<u64> },

    /// Provider returned a 5xx status.
    #[error("provider unavailable (status {status})")]
    Unavailable { status: u16 },

    /// Authentication rejected. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Quota or billing exhausted. Never retried.
    #[error("quota exhausted: {0}")]
    Quota(String),

    /// Provider returned a success status with no embeddings.
    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    /// Provider returned a different number of vectors than texts sent.
    #[error("embedding count mismatch: sent {sent}, got {got}")]
    CountMismatch { sent: usize, got: usize },

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

impl EmbedError {
    /// Whether a retry with backoff may succeed.
    ///
    /// Auth and quota failures are fatal: retrying cannot fix them and
    /// they must surface to the caller instead.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } | Self::Unavailable { .. } => true,
            Self::Json(_)
            | Self::Auth(_)
            | Self::Quota(_)
            | Self::EmptyResponse { .. }
            | Self::CountMismatch { .. }
            | Self::Other(_) => false,
        }
    }
}

/// Result type alias using [`EmbedError`].
pub type Result<T> = std::result::Result<T, EmbedError>;
