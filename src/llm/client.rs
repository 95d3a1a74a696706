use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{GenerateContentRequest, GenerateContentResponse, PromptRequest};
use crate::config::{GeminiConfig, RequestConfig};
use crate::error::{LlmError, LlmResult};

/// A text generator that turns a system instruction and turn history into
/// free-form text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Run one generation and return the newest model reply text.
    async fn generate(&self, request: PromptRequest) -> LlmResult<String>;
}

/// Client for the Gemini `generateContent` API
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    request_config: RequestConfig,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: &GeminiConfig, request_config: RequestConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LlmError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a credential is available
    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        api_key: &str,
        request: &GenerateContentRequest,
    ) -> LlmResult<GenerateContentResponse> {
        debug!(
            model = %self.model,
            turns = request.contents.len(),
            "Calling Gemini generateContent"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    async fn generate(&self, request: PromptRequest) -> LlmResult<String> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingCredential)?;
        let body = GenerateContentRequest::from(&request);
        let start = Instant::now();

        let response = match self.execute_request(api_key, &body).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    model = %self.model,
                    error = %e,
                    latency_ms = start.elapsed().as_millis(),
                    "Gemini call failed"
                );
                return Err(e);
            }
        };

        if let Some(usage) = &response.usage_metadata {
            debug!(
                prompt_tokens = ?usage.prompt_token_count,
                completion_tokens = ?usage.candidates_token_count,
                total_tokens = ?usage.total_token_count,
                "Gemini token usage"
            );
        }

        match response.text() {
            Some(text) => {
                info!(
                    model = %self.model,
                    latency_ms = start.elapsed().as_millis(),
                    "Gemini call succeeded"
                );
                Ok(text)
            }
            None => {
                let reason = response.block_reason().unwrap_or("no candidates returned");
                warn!(model = %self.model, reason = %reason, "Gemini returned no text");
                Err(LlmError::InvalidResponse {
                    message: format!("Model returned no text ({})", reason),
                })
            }
        }
    }
}
