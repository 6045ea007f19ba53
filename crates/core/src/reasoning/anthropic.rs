//! Anthropic messages API client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    map_send_error, CompletionRequest, CompletionResponse, ModelTier, ReasoningClient,
    ReasoningError, TokenUsage,
};

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    main_model: String,
    fast_model: String,
    api_base: String,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        main_model: impl Into<String>,
        fast_model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            main_model: main_model.into(),
            fast_model: fast_model.into(),
            api_base: "https://api.anthropic.com".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

#[async_trait]
impl ReasoningClient for AnthropicClient {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Main => &self.main_model,
            ModelTier::Fast => &self.fast_model,
        }
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ReasoningError> {
        let anthropic_request = AnthropicRequest {
            model: self.model(request.tier).to_string(),
            max_tokens: request.max_tokens,
            system: request.system,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.prompt,
            }],
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .timeout(self.timeout)
            .json(&anthropic_request)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicError>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(ReasoningError::Api { status, message });
        }

        let anthropic_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::Json(e.to_string()))?;

        let text = anthropic_response
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            text,
            usage: TokenUsage {
                input_tokens: anthropic_response.usage.input_tokens,
                output_tokens: anthropic_response.usage.output_tokens,
            },
            model: anthropic_response.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_complete_parses_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": " world"}],
                "model": "claude-3-5-haiku-20241022",
                "usage": {"input_tokens": 12, "output_tokens": 3}
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::new("secret", "claude-sonnet-4", "claude-3-5-haiku-20241022")
            .with_api_base(server.uri());
        let response = client
            .complete(CompletionRequest::new("Hi").with_tier(ModelTier::Fast))
            .await
            .unwrap();

        assert_eq!(response.text, "Hello world");
        assert_eq!(response.usage.input_tokens, 12);
        assert_eq!(response.model, "claude-3-5-haiku-20241022");
    }

    #[tokio::test]
    async fn test_overload_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(serde_json::json!({
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::new("k", "m", "f").with_api_base(server.uri());
        let err = client.complete(CompletionRequest::new("Hi")).await.unwrap_err();
        match err {
            ReasoningError::Api { status, message } => {
                assert_eq!(status, 529);
                assert_eq!(message, "Overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_model_tiers() {
        let client = AnthropicClient::new("k", "main", "fast");
        assert_eq!(client.provider(), "anthropic");
        assert_eq!(client.model(ModelTier::Main), "main");
        assert_eq!(client.model(ModelTier::Fast), "fast");
    }
}
