//! eTXT uniqueness checker.
//!
//! The API takes form posts to a single endpoint with a `method` field:
//! `text_check` queues a text, `text_check_result` reports on it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::{CheckHandle, CheckReport, CheckStatus, OriginalityChecker, VerificationError};

/// eTXT errors carry text, not codes.
const API_ERROR_CODE: i64 = -1;

pub struct EtxtChecker {
    client: reqwest::Client,
    token: String,
    api_base: String,
    timeout: Duration,
}

impl EtxtChecker {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            api_base: "https://www.etxt.ru/api".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn call<T: Serialize>(&self, form: &T) -> Result<Value, VerificationError> {
        let response = self
            .client
            .post(format!("{}/", self.api_base.trim_end_matches('/')))
            .timeout(self.timeout)
            .form(form)
            .send()
            .await
            .map_err(|e| VerificationError::Http(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(VerificationError::Unavailable(status.as_u16()));
        }
        if !status.is_success() {
            return Err(VerificationError::Api {
                code: status.as_u16() as i64,
                message: response.text().await.unwrap_or_default(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| VerificationError::Http(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct CheckForm<'a> {
    method: &'static str,
    token: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct ResultForm<'a> {
    method: &'static str,
    token: &'a str,
    id: &'a str,
}

fn api_error(body: &Value) -> Option<VerificationError> {
    let error = body.get("error")?;
    let message = match error {
        Value::Null | Value::Bool(false) => return None,
        Value::String(s) if s.is_empty() => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(VerificationError::Api {
        code: API_ERROR_CODE,
        message,
    })
}

/// Ids and percentages arrive as strings or numbers depending on the call.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl OriginalityChecker for EtxtChecker {
    fn name(&self) -> &str {
        "etxt"
    }

    async fn submit(&self, text: &str) -> Result<CheckHandle, VerificationError> {
        let body = self
            .call(&CheckForm {
                method: "text_check",
                token: &self.token,
                text,
            })
            .await?;

        if let Some(err) = api_error(&body) {
            return Err(err);
        }
        body.get("id")
            .and_then(as_text)
            .map(CheckHandle)
            .ok_or_else(|| VerificationError::Http("response without task id".to_string()))
    }

    async fn poll(&self, handle: &CheckHandle) -> Result<CheckStatus, VerificationError> {
        let body = self
            .call(&ResultForm {
                method: "text_check_result",
                token: &self.token,
                id: &handle.0,
            })
            .await?;

        if body.get("status").and_then(Value::as_str) == Some("processing") {
            return Ok(CheckStatus::Pending);
        }
        if let Some(err) = api_error(&body) {
            return Err(err);
        }

        let uniqueness = body
            .get("unique")
            .and_then(as_text)
            .and_then(|s| s.trim().parse::<f32>().ok());
        match uniqueness {
            // eTXT reports no matched sources
            Some(uniqueness) => Ok(CheckStatus::Done(CheckReport::new(
                uniqueness.clamp(0.0, 100.0),
            ))),
            None => Ok(CheckStatus::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Classify;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_submit_returns_task_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("method=text_check"))
            .and(body_string_contains("token=tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 48213})))
            .mount(&server)
            .await;

        let checker = EtxtChecker::new("tok").with_api_base(server.uri());
        let handle = checker.submit("Some text").await.unwrap();
        assert_eq!(handle, CheckHandle("48213".to_string()));
    }

    #[tokio::test]
    async fn test_poll_processing_then_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("id=busy"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("method=text_check_result"))
            .and(body_string_contains("id=ready"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unique": "81.5"})))
            .mount(&server)
            .await;

        let checker = EtxtChecker::new("tok").with_api_base(server.uri());

        let pending = checker.poll(&CheckHandle("busy".to_string())).await.unwrap();
        assert_eq!(pending, CheckStatus::Pending);

        let done = checker.poll(&CheckHandle("ready".to_string())).await.unwrap();
        match done {
            CheckStatus::Done(report) => {
                assert!((report.uniqueness - 81.5).abs() < 0.01);
                assert!(report.matches.is_empty());
            }
            CheckStatus::Pending => panic!("expected a result"),
        }
    }

    #[tokio::test]
    async fn test_error_field_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "invalid token"})),
            )
            .mount(&server)
            .await;

        let checker = EtxtChecker::new("bad").with_api_base(server.uri());
        let err = checker.submit("text").await.unwrap_err();
        match &err {
            VerificationError::Api { message, .. } => assert_eq!(message, "invalid token"),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let checker = EtxtChecker::new("tok").with_api_base(server.uri());
        let err = checker.poll(&CheckHandle("x".to_string())).await.unwrap_err();
        assert!(err.is_transient());
    }
}
