//! OpenAI-compatible chat-completions client.
//!
//! One client covers both supported families; they differ only in API base
//! and credentials. Rate-limited requests are retried in place with
//! exponential backoff so long-running elicitation sessions survive burst
//! limits without losing work.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::backend::{GenerationRequest, GenerationResponse, LanguageBackend, TokenUsage};

/// Backoff starts at this delay and doubles per attempt.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Backoff never exceeds this delay.
const BACKOFF_CAP: Duration = Duration::from_secs(10);
/// Rate-limit retries before giving up. Generous on purpose: a full batch
/// can sit behind a minute-scale quota window and still finish.
const RATE_LIMIT_ATTEMPTS: u32 = 100;

/// Client for OpenAI-compatible chat-completions APIs.
pub struct OpenAiBackend {
    api_base: String,
    api_key: String,
    http_client: Client,
}

impl OpenAiBackend {
    /// Create a client with explicit configuration.
    pub fn new(api_base: String, api_key: String) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base,
            api_key,
            http_client,
        })
    }

    /// Create a client from environment variables.
    ///
    /// Reads `VIGNETTE_API_KEY` (required) and `VIGNETTE_API_BASE`
    /// (optional; `default_base` is used when unset).
    pub fn from_env(default_base: &str) -> Result<Self, LlmError> {
        let api_key = env::var("VIGNETTE_API_KEY").map_err(|_| LlmError::MissingApiKey)?;
        let api_base = env::var("VIGNETTE_API_BASE").unwrap_or_else(|_| default_base.to_string());
        Self::new(api_base, api_key)
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn send_once(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let url = format!("{}/chat/completions", self.api_base);

        let http_response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let body = http_response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|parsed| parsed.error.message)
                .unwrap_or(body);

            if code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::ApiError { code, message });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("failed to parse API response: {e}")))?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ParseError("no choices in API response".to_string()))?;

        Ok(GenerationResponse {
            model: api_response.model,
            content,
            usage: api_response
                .usage
                .map(|usage| TokenUsage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                })
                .unwrap_or_default(),
        })
    }
}

/// Delay before retry `attempt` (0-based): `BACKOFF_BASE * 2^attempt`,
/// capped at `BACKOFF_CAP`.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.min(31);
    let delay = BACKOFF_BASE.saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
    delay.min(BACKOFF_CAP)
}

#[async_trait]
impl LanguageBackend for OpenAiBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(&request).await {
                Err(LlmError::RateLimited(message)) if attempt + 1 < RATE_LIMIT_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        %message,
                        "rate limited; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Ok(response) => {
                    debug!(
                        model = %response.model,
                        prompt_tokens = response.usage.prompt_tokens,
                        completion_tokens = response.usage.completion_tokens,
                        "generation complete"
                    );
                    return Ok(response);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Wire structures for the chat-completions API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
