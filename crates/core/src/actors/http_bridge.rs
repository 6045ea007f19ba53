//! JSON-over-HTTP site bridge.
//!
//! Talks to a separate browser-automation process that exposes the host
//! platform as a small REST API.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ActionError, BidOutcome, BidStatus, BiddingActor, ConversationActor, DeliveryActor,
    DeliveryKind, DetailSource, DiscoverySource, InboundMessage, ItemSummary,
};
use crate::registry::ItemDetail;

/// Site bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Base URL of the bridge (e.g., "http://127.0.0.1:9300").
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

pub struct HttpSiteBridge {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct BidRequest<'a> {
    price: u32,
    comment: &'a str,
}

#[derive(Debug, Deserialize)]
struct BidResponse {
    result: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BidStatusResponse {
    status: String,
    #[serde(default)]
    final_price: Option<u32>,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    body: &'a str,
}

impl HttpSiteBridge {
    pub fn new(config: &SiteConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn url(&self, external_ref: Option<&str>, tail: &str) -> String {
        match external_ref {
            Some(r) => format!("{}/items/{}{}", self.base_url, urlencoding::encode(r), tail),
            None => format!("{}/items{}", self.base_url, tail),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(self.timeout);
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ActionError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                ActionError::Timeout
            } else {
                ActionError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        debug!(status = code, body = %body, "Site bridge error response");
        Err(classify_status(code, &body))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, ActionError> {
        let response = self.send(self.client.get(url)).await?;
        read_json(response).await
    }
}

/// Map a non-success HTTP status to an action error.
fn classify_status(code: u16, body: &str) -> ActionError {
    if code == 403 || code == 429 {
        return ActionError::Ban(format!("HTTP {}", code));
    }
    if body.to_lowercase().contains("captcha") {
        return ActionError::Ban("captcha".to_string());
    }
    match code {
        408 => ActionError::Timeout,
        c if c >= 500 => ActionError::Unavailable(c),
        _ => ActionError::Rejected(format!("HTTP {}: {}", code, body)),
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ActionError> {
    let text = response
        .text()
        .await
        .map_err(|e| ActionError::Http(e.to_string()))?;
    if text.to_lowercase().contains("captcha") && serde_json::from_str::<T>(&text).is_err() {
        return Err(ActionError::Ban("captcha".to_string()));
    }
    serde_json::from_str(&text).map_err(|e| ActionError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl DiscoverySource for HttpSiteBridge {
    async fn list_new_items(&self) -> Result<Vec<ItemSummary>, ActionError> {
        self.get_json(self.url(None, "")).await
    }
}

#[async_trait]
impl DetailSource for HttpSiteBridge {
    async fn fetch_detail(&self, external_ref: &str) -> Result<ItemDetail, ActionError> {
        self.get_json(self.url(Some(external_ref), "")).await
    }
}

#[async_trait]
impl BiddingActor for HttpSiteBridge {
    async fn place_bid(
        &self,
        external_ref: &str,
        price: u32,
        comment: &str,
    ) -> Result<BidOutcome, ActionError> {
        let request = self
            .client
            .post(self.url(Some(external_ref), "/bids"))
            .json(&BidRequest { price, comment });
        let response: BidResponse = read_json(self.send(request).await?).await?;

        match response.result.as_str() {
            "placed" => Ok(BidOutcome::Placed),
            "already_taken" => Ok(BidOutcome::AlreadyTaken),
            "closed" => Ok(BidOutcome::Closed),
            "rejected" => Ok(BidOutcome::Rejected(
                response.reason.unwrap_or_else(|| "no reason given".to_string()),
            )),
            other => Err(ActionError::InvalidResponse(format!(
                "unknown bid result: {}",
                other
            ))),
        }
    }

    async fn bid_status(&self, external_ref: &str) -> Result<BidStatus, ActionError> {
        let response: BidStatusResponse = self.get_json(self.url(Some(external_ref), "/bid")).await?;
        match response.status.as_str() {
            "pending" => Ok(BidStatus::Pending),
            "accepted" => Ok(BidStatus::Accepted {
                final_price: response.final_price,
            }),
            "declined" => Ok(BidStatus::Declined),
            other => Err(ActionError::InvalidResponse(format!(
                "unknown bid status: {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl DeliveryActor for HttpSiteBridge {
    async fn deliver(
        &self,
        external_ref: &str,
        artifact: &Path,
        kind: DeliveryKind,
    ) -> Result<(), ActionError> {
        let data = tokio::fs::read(artifact)
            .await
            .map_err(|e| ActionError::Artifact(format!("{}: {}", artifact.display(), e)))?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.md".to_string());

        let form = multipart::Form::new()
            .text("kind", kind.as_str())
            .part("file", multipart::Part::bytes(data).file_name(file_name));

        let request = self
            .client
            .post(self.url(Some(external_ref), "/deliveries"))
            .multipart(form);
        self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationActor for HttpSiteBridge {
    async fn fetch_messages(&self, external_ref: &str) -> Result<Vec<InboundMessage>, ActionError> {
        self.get_json(self.url(Some(external_ref), "/messages")).await
    }

    async fn send_message(&self, external_ref: &str, body: &str) -> Result<(), ActionError> {
        let request = self
            .client
            .post(self.url(Some(external_ref), "/messages"))
            .json(&MessageRequest { body });
        self.send(request).await?;
        Ok(())
    }
}
