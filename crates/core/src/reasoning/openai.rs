//! OpenAI chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    map_send_error, CompletionRequest, CompletionResponse, ModelTier, ReasoningClient,
    ReasoningError, TokenUsage,
};

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    main_model: String,
    fast_model: String,
    api_base: String,
    timeout: Duration,
}

impl OpenAiClient {
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
            api_base: "https://api.openai.com".to_string(),
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
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

#[async_trait]
impl ReasoningClient for OpenAiClient {
    fn provider(&self) -> &str {
        "openai"
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
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(system),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: Some(request.prompt),
        });

        let chat_request = ChatRequest {
            model: self.model(request.tier).to_string(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAiError>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(ReasoningError::Api { status, message });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::Json(e.to_string()))?;

        let text = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let usage = chat_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text,
            usage,
            model: chat_response.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_complete_with_system_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "choices": [{"message": {"role": "assistant", "content": "{\"score\": 80}"}}],
                "usage": {"prompt_tokens": 40, "completion_tokens": 6}
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new("sk-test", "gpt-4o", "gpt-4o-mini").with_api_base(server.uri());
        let response = client
            .complete(
                CompletionRequest::new("Score this")
                    .with_system("You are a strict reviewer")
                    .with_tier(ModelTier::Fast),
            )
            .await
            .unwrap();

        assert_eq!(response.text, "{\"score\": 80}");
        assert_eq!(response.usage.output_tokens, 6);
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        use crate::retry::Classify;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "Rate limit reached"}
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new("k", "m", "f").with_api_base(server.uri());
        let err = client.complete(CompletionRequest::new("Hi")).await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("Rate limit reached"));
    }
}
