//! OpenAI-compatible embeddings client.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EmbedError;
use crate::provider::{BoxFuture, EmbeddingProvider};

/// Batch embedder speaking the OpenAI `/embeddings` wire format.
///
/// Works against OpenAI itself and the many local servers that expose
/// the same endpoint (llama.cpp, vLLM, LM Studio).
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedder {
    #[must_use]
    pub fn new(api_key: String, mut base_url: String, model: String) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: default_client(),
            api_key,
            base_url,
            model,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let text = response.text().await.map_err(EmbedError::Http)?;

        if !status.is_success() {
            return Err(status_error(status, &text, retry_after));
        }

        let resp: EmbeddingResponse = serde_json::from_str(&text)?;
        if resp.data.is_empty() {
            return Err(EmbedError::EmptyResponse {
                provider: "openai".into(),
            });
        }
        if resp.data.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                sent: texts.len(),
                got: resp.data.len(),
            });
        }

        // The API documents `index` explicitly; order the output by it
        // rather than trusting array order.
        let mut data = resp.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

fn status_error(status: reqwest::StatusCode, body: &str, retry_after: Option<u64>) -> EmbedError {
    let detail = body.chars().take(200).collect::<String>();
    match status.as_u16() {
        401 | 403 => EmbedError::Auth(detail),
        402 => EmbedError::Quota(detail),
        429 => {
            // OpenAI reports quota exhaustion as a 429 with a distinct code.
            if body.contains("insufficient_quota") {
                EmbedError::Quota(detail)
            } else {
                EmbedError::RateLimited { retry_after }
            }
        }
        s if status.is_server_error() => EmbedError::Unavailable { status: s },
        s => EmbedError::Other(format!("embedding request failed (status {s}): {detail}")),
    }
}

fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(60))
        .user_agent(concat!("quarry/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn embed_batch(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>, EmbedError>> {
        Box::pin(async move {
            if texts.is_empty() {
                return Ok(vec![]);
            }
            self.request(&texts).await
        })
    }

    fn tag(&self) -> String {
        format!("openai/{}", self.model)
    }
}
