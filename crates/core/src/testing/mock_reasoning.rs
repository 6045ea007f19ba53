//! Mock reasoning client for testing.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::reasoning::{
    CompletionRequest, CompletionResponse, ModelTier, ReasoningClient, ReasoningError, TokenUsage,
};

/// Produces a response for requests that have no scripted answer.
type Handler = Box<dyn Fn(&CompletionRequest) -> Result<String, ReasoningError> + Send + Sync>;

/// Mock implementation of the ReasoningClient trait.
///
/// Scripted responses are consumed in order; once the script is empty the
/// handler (if any) answers. Every request is recorded.
///
/// # Example
///
/// ```rust,ignore
/// let client = MockReasoningClient::new();
/// client.push_response(r#"{"score": 75, "can_do": true, "reason": "fits"}"#);
/// client.set_handler(|req| Ok(format!("echo: {}", req.purpose)));
/// ```
pub struct MockReasoningClient {
    script: Arc<RwLock<VecDeque<Result<String, ReasoningError>>>>,
    handler: Arc<RwLock<Option<Handler>>>,
    requests: Arc<RwLock<Vec<CompletionRequest>>>,
}

impl std::fmt::Debug for MockReasoningClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockReasoningClient")
            .field("script", &"<script>")
            .field("handler", &"<handler>")
            .field("requests", &"<requests>")
            .finish()
    }
}

impl Default for MockReasoningClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockReasoningClient {
    pub fn new() -> Self {
        Self {
            script: Arc::new(RwLock::new(VecDeque::new())),
            handler: Arc::new(RwLock::new(None)),
            requests: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Queue a successful response.
    pub fn push_response(&self, text: impl Into<String>) {
        self.script.write().unwrap().push_back(Ok(text.into()));
    }

    /// Queue a failure.
    pub fn push_error(&self, error: ReasoningError) {
        self.script.write().unwrap().push_back(Err(error));
    }

    /// Answer unscripted requests with `handler`.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&CompletionRequest) -> Result<String, ReasoningError> + Send + Sync + 'static,
    {
        *self.handler.write().unwrap() = Some(Box::new(handler));
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.read().unwrap().clone()
    }

    /// Requests received with the given purpose label.
    pub fn requests_for(&self, purpose: &str) -> Vec<CompletionRequest> {
        self.requests
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.purpose == purpose)
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.read().unwrap().len()
    }
}

#[async_trait]
impl ReasoningClient for MockReasoningClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => "mock-fast",
            ModelTier::Main => "mock-main",
        }
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ReasoningError> {
        self.requests.write().unwrap().push(request.clone());

        let scripted = self.script.write().unwrap().pop_front();
        let text = match scripted {
            Some(result) => result?,
            None => match *self.handler.read().unwrap() {
                Some(ref handler) => handler(&request)?,
                None => {
                    return Err(ReasoningError::Api {
                        status: 400,
                        message: format!("no mock response for '{}'", request.purpose),
                    })
                }
            },
        };

        let input_tokens = request.prompt.split_whitespace().count() as u32;
        let output_tokens = text.split_whitespace().count() as u32;
        Ok(CompletionResponse {
            text,
            usage: TokenUsage {
                input_tokens,
                output_tokens,
            },
            model: self.model(request.tier).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_handler() {
        let client = MockReasoningClient::new();
        client.push_response("first");
        client.set_handler(|req| Ok(format!("handled {}", req.purpose)));

        let a = client.complete(CompletionRequest::new("a")).await.unwrap();
        let b = client
            .complete(CompletionRequest::new("b").with_purpose("outline"))
            .await
            .unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "handled outline");
        assert_eq!(client.requests_for("outline").len(), 1);
    }

    #[tokio::test]
    async fn test_unscripted_request_fails() {
        let client = MockReasoningClient::new();
        let err = client.complete(CompletionRequest::new("x")).await.unwrap_err();
        assert!(matches!(err, ReasoningError::Api { status: 400, .. }));
    }
}
