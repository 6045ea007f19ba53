//! text.ru uniqueness checker.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    CheckHandle, CheckReport, CheckStatus, MatchedFragment, OriginalityChecker, VerificationError,
};

/// text.ru reports "still checking" with this code.
const PENDING_CODE: i64 = 181;

pub struct TextRuChecker {
    client: reqwest::Client,
    user_key: String,
    api_base: String,
    timeout: Duration,
}

impl TextRuChecker {
    pub fn new(user_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_key: user_key.into(),
            api_base: "https://api.text.ru".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn post<T: Serialize>(&self, body: &T) -> Result<Value, VerificationError> {
        let response = self
            .client
            .post(format!("{}/post", self.api_base))
            .timeout(self.timeout)
            .json(body)
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
struct SubmitRequest<'a> {
    text: &'a str,
    userkey: &'a str,
}

#[derive(Debug, Serialize)]
struct ResultRequest<'a> {
    uid: &'a str,
    userkey: &'a str,
    jsonvisible: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResultDetail {
    #[serde(default)]
    urls: Vec<ResultUrl>,
}

#[derive(Debug, Deserialize)]
struct ResultUrl {
    url: String,
    #[serde(default)]
    words: String,
}

fn api_error(body: &Value) -> Option<VerificationError> {
    let code = body.get("error_code")?.as_i64()?;
    let message = body
        .get("error_desc")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    Some(VerificationError::Api { code, message })
}

/// `unique` comes back as a string ("72.50") or a number.
fn parse_unique(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_matches(body: &Value) -> Vec<MatchedFragment> {
    let Some(raw) = body.get("result_json").and_then(Value::as_str) else {
        return Vec::new();
    };
    let Ok(detail) = serde_json::from_str::<ResultDetail>(raw) else {
        return Vec::new();
    };
    detail
        .urls
        .into_iter()
        .map(|u| MatchedFragment {
            source: u.url,
            word_positions: u
                .words
                .split_whitespace()
                .filter_map(|w| w.parse().ok())
                .collect(),
        })
        .collect()
}

#[async_trait]
impl OriginalityChecker for TextRuChecker {
    fn name(&self) -> &str {
        "textru"
    }

    async fn submit(&self, text: &str) -> Result<CheckHandle, VerificationError> {
        let body = self
            .post(&SubmitRequest {
                text,
                userkey: &self.user_key,
            })
            .await?;

        if let Some(err) = api_error(&body) {
            return Err(err);
        }
        body.get("text_uid")
            .and_then(Value::as_str)
            .map(|uid| CheckHandle(uid.to_string()))
            .ok_or_else(|| VerificationError::Http("response without text_uid".to_string()))
    }

    async fn poll(&self, handle: &CheckHandle) -> Result<CheckStatus, VerificationError> {
        let body = self
            .post(&ResultRequest {
                uid: &handle.0,
                userkey: &self.user_key,
                jsonvisible: "detail",
            })
            .await?;

        match api_error(&body) {
            Some(VerificationError::Api { code, .. }) if code == PENDING_CODE => {
                return Ok(CheckStatus::Pending)
            }
            Some(err) => return Err(err),
            None => {}
        }

        match body.get("unique").and_then(parse_unique) {
            Some(uniqueness) => Ok(CheckStatus::Done(CheckReport {
                uniqueness: uniqueness.clamp(0.0, 100.0),
                matches: parse_matches(&body),
            })),
            None => Ok(CheckStatus::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Classify;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_submit_returns_uid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/post"))
            .and(body_partial_json(json!({"userkey": "key"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text_uid": "abc123"})))
            .mount(&server)
            .await;

        let checker = TextRuChecker::new("key").with_api_base(server.uri());
        let handle = checker.submit("Some text").await.unwrap();
        assert_eq!(handle, CheckHandle("abc123".to_string()));
    }

    #[tokio::test]
    async fn test_poll_pending_then_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"uid": "pending-uid"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error_code": 181,
                "error_desc": "Текст ещё не проверен"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"uid": "done-uid"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "unique": "64.30",
                "result_json": "{\"urls\":[{\"url\":\"https://example.org/a\",\"plagiat\":20,\"words\":\"3 4 5\"}]}"
            })))
            .mount(&server)
            .await;

        let checker = TextRuChecker::new("key").with_api_base(server.uri());

        let pending = checker.poll(&CheckHandle("pending-uid".to_string())).await.unwrap();
        assert_eq!(pending, CheckStatus::Pending);

        let done = checker.poll(&CheckHandle("done-uid".to_string())).await.unwrap();
        match done {
            CheckStatus::Done(report) => {
                assert!((report.uniqueness - 64.3).abs() < 0.01);
                assert_eq!(report.matches.len(), 1);
                assert_eq!(report.matches[0].word_positions, vec![3, 4, 5]);
            }
            CheckStatus::Pending => panic!("expected a result"),
        }
    }

    #[tokio::test]
    async fn test_error_codes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error_code": 142,
                "error_desc": "Пользователь не найден"
            })))
            .mount(&server)
            .await;

        let checker = TextRuChecker::new("bad").with_api_base(server.uri());
        let err = checker.submit("text").await.unwrap_err();
        assert!(matches!(err, VerificationError::Api { code: 142, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let checker = TextRuChecker::new("key").with_api_base(server.uri());
        let err = checker.submit("text").await.unwrap_err();
        assert!(err.is_transient());
    }
}
