//! Anthropic Messages API backend.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use questgen_core::traits::{
    CompletionRequest, CompletionResponse, CompletionService, CompletionUsage, ModelInfo,
};

use crate::error::ProviderError;
use crate::http::{build_client, status_error, transport_error};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic API backend.
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, base_url: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: build_client()?,
        })
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: AnthropicUsage,
    model: String,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<AnthropicError>(body)
        .ok()
        .map(|e| e.error.message)
}

#[async_trait]
impl CompletionService for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let start = Instant::now();

        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system_context,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &request.prompt_text,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response, &request.model, error_message).await.into());
        }

        let api_response: AnthropicResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status: 0,
                message: format!("failed to parse response: {e}"),
            })?;

        let text = api_response
            .content
            .iter()
            .filter(|c| c.kind.is_empty() || c.kind == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        tracing::debug!(
            input_tokens = api_response.usage.input_tokens,
            output_tokens = api_response.usage.output_tokens,
            "completion received"
        );

        Ok(CompletionResponse {
            text,
            model: api_response.model,
            usage: CompletionUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "claude-sonnet-4-5".into(),
                name: "Claude Sonnet 4.5".into(),
                provider: "anthropic".into(),
                max_context: 200_000,
                cost_per_1k_input: 0.003,
                cost_per_1k_output: 0.015,
            },
            ModelInfo {
                id: "claude-haiku-4-5".into(),
                name: "Claude Haiku 4.5".into(),
                provider: "anthropic".into(),
                max_context: 200_000,
                cost_per_1k_input: 0.001,
                cost_per_1k_output: 0.005,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questgen_core::error::provider_error;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "claude-sonnet-4-5".into(),
            system_context: "You write test items.".into(),
            prompt_text: "Write one analogy question".into(),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn successful_completion() {
        let server = MockServer::start().await;

        let response_body = serde_json::json!({
            "content": [{"type": "text", "text": "{\"question_text\": \"Q\"}"}],
            "model": "claude-sonnet-4-5",
            "usage": {"input_tokens": 50, "output_tokens": 20}
        });

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "system": "You write test items.",
                "messages": [{"role": "user", "content": "Write one analogy question"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&response_body))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("test-key", Some(server.uri())).unwrap();
        let response = provider.complete(&request()).await.unwrap();
        assert!(response.text.contains("question_text"));
        assert_eq!(response.usage.input_tokens, 50);
        assert_eq!(response.usage.output_tokens, 20);
    }

    #[tokio::test]
    async fn authentication_failure_is_permanent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "authentication_error", "message": "invalid x-api-key"}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("bad-key", Some(server.uri())).unwrap();
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(err.to_string().contains("invalid x-api-key"));
        assert!(provider_error(&err).is_some_and(|e| e.is_permanent()));
    }

    #[tokio::test]
    async fn rate_limiting_carries_retry_hint() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("test-key", Some(server.uri())).unwrap();
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
        assert_eq!(
            provider_error(&err).and_then(|e| e.retry_after_ms()),
            Some(7000)
        );
    }

    #[tokio::test]
    async fn overloaded_is_transient_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("test-key", Some(server.uri())).unwrap();
        let err = provider.complete(&request()).await.unwrap_err();
        assert_eq!(err.to_string(), "API error (HTTP 529): Overloaded");
        assert!(!provider_error(&err).unwrap().is_permanent());
    }
}
