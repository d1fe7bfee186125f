use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::prompt;
use crate::schema::ChunkInput;

/// Failures of the external extraction collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("extractor rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("extractor transport error: {0}")]
    Transport(String),

    #[error("invalid extractor response: {0}")]
    InvalidResponse(String),
}

impl ExtractionError {
    /// Timeouts, rate limits and transport failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ExtractionError::InvalidResponse(_))
    }
}

/// Anything that turns a chunk of text into a raw extraction blob.
///
/// The blob is validated by [`crate::ExtractionBatch::from_value`]; clients
/// only guarantee it is JSON.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    async fn extract(&self, chunk: &ChunkInput) -> Result<Value, ExtractionError>;
}

/// Parse a model response, tolerating markdown code fences around the JSON.
pub fn parse_json_response(response: &str) -> Result<Value, ExtractionError> {
    let trimmed = response.trim();
    let body = match trimmed.find("```") {
        Some(start) => {
            let after_fence = &trimmed[start + 3..];
            let after_tag = after_fence.strip_prefix("json").unwrap_or(after_fence);
            match after_tag.find("```") {
                Some(end) => &after_tag[..end],
                None => after_tag,
            }
        }
        None => trimmed,
    };

    serde_json::from_str(body.trim()).map_err(|e| ExtractionError::InvalidResponse(e.to_string()))
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String, // "json" for structured output
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self::with_timeout(base_url, model, Duration::from_secs(60))
    }

    pub fn with_timeout(base_url: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url,
            model,
            timeout,
            client,
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, ExtractionError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(), // Force JSON output
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ExtractionError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(ExtractionError::Transport(format!("Ollama request failed: {}", status)));
        }
        if !status.is_success() {
            return Err(ExtractionError::InvalidResponse(format!(
                "Ollama request failed: {}",
                status
            )));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| self.classify(e))?;

        Ok(ollama_response.response)
    }

    fn classify(&self, error: reqwest::Error) -> ExtractionError {
        if error.is_timeout() {
            ExtractionError::Timeout(self.timeout)
        } else if error.is_decode() {
            ExtractionError::InvalidResponse(error.to_string())
        } else {
            ExtractionError::Transport(error.to_string())
        }
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new("http://localhost:11434".to_string(), "llama3".to_string())
    }
}

#[async_trait]
impl ExtractionClient for OllamaClient {
    async fn extract(&self, chunk: &ChunkInput) -> Result<Value, ExtractionError> {
        let response = self.generate(&prompt::build_extraction_prompt(chunk)).await?;

        match parse_json_response(&response) {
            Ok(value) => Ok(value),
            Err(first_error) => {
                // One correction round for malformed JSON.
                warn!(
                    document_id = %chunk.document_id,
                    error = %first_error,
                    "Extractor returned invalid JSON, asking for a correction"
                );
                let corrected = self.generate(&prompt::build_retry_prompt(&response)).await?;
                let value = parse_json_response(&corrected)?;
                debug!(document_id = %chunk.document_id, "Correction round produced valid JSON");
                Ok(value)
            }
        }
    }
}
