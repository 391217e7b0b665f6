use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;

use super::models::*;
use super::stream::parse_sse_stream;
use crate::providers::traits::AiProvider;
use crate::providers::types::*;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const INVALID_KEY_REASON: &str = "API_KEY_INVALID";

pub struct GeminiProvider {
    client: Client,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn translate_role(role: Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Model => "model",
        }
    }

    fn build_contents(messages: &[ChatMessage]) -> Vec<GeminiContent> {
        messages
            .iter()
            .map(|msg| GeminiContent {
                role: Some(Self::translate_role(msg.role).to_string()),
                parts: vec![GeminiPart {
                    text: Some(msg.content.clone()),
                }],
            })
            .collect()
    }

    fn build_request(request: &ChatRequest) -> GeminiRequest {
        GeminiRequest {
            contents: Self::build_contents(&request.messages),
            system_instruction: request.system_prompt.as_ref().map(|prompt| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(prompt.clone()),
                }],
            }),
        }
    }

    /// Map a non-success response to a `ProviderError`.
    ///
    /// Gemini reports a bad key as HTTP 400 with reason `API_KEY_INVALID`, so
    /// the body is inspected as well as the status.
    fn classify_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
        let parsed = serde_json::from_str::<GeminiErrorEnvelope>(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|e| e.error.message.clone())
            .unwrap_or_else(|| "Request failed".to_string());
        let invalid_key = parsed.as_ref().is_some_and(|e| {
            e.error
                .details
                .iter()
                .any(|d| d.reason.as_deref() == Some(INVALID_KEY_REASON))
        }) || body.contains(INVALID_KEY_REASON);

        if invalid_key {
            return ProviderError::AuthError(format!("{}: {}", INVALID_KEY_REASON, message));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return ProviderError::AuthError(message);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return ProviderError::RateLimited {
                retry_after_secs: None,
            };
        }
        ProviderError::RequestFailed(format!("HTTP {}: {}", status.as_u16(), message))
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn stream_message(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            DEFAULT_BASE_URL, request.model
        );

        let gemini_request = Self::build_request(&request);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &request.api_key)
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status, &body));
        }

        parse_sse_stream(response, tx).await;

        Ok(())
    }
}
