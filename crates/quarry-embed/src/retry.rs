//! Bounded retry with exponential backoff for transient provider errors.

use std::time::Duration;

use crate::error::EmbedError;
use crate::provider::EmbeddingProvider;

const BASE_BACKOFF_MS: u64 = 500;

/// Backoff before retry `attempt` (0-based): 500ms, 1s, 2s, ...
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS << attempt.min(6))
}

/// Embed a batch, retrying transient failures up to `max_retries` times.
///
/// Fatal errors (auth, quota, malformed responses) are returned on the
/// first occurrence without retrying.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted, or the first
/// non-transient error.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: Vec<String>,
    max_retries: u32,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut attempt = 0;
    loop {
        match provider.embed_batch(texts.clone()).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) if e.is_transient() && attempt < max_retries => {
                // A server-provided Retry-After hint overrides the
                // backoff schedule when it asks for a longer wait.
                let delay = match &e {
                    EmbedError::RateLimited {
                        retry_after: Some(secs),
                    } => backoff_delay(attempt).max(Duration::from_secs(*secs)),
                    _ => backoff_delay(attempt),
                };
                tracing::warn!(
                    attempt = attempt + 1,
                    max = max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "transient embedding error, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
