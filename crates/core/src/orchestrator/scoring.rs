//! Pre-scoring gates and the scoring call.

use serde::Deserialize;

use crate::reasoning::{
    complete_json_retrying, CompletionRequest, ModelTier, ReasoningClient, ReasoningError,
    UsageTally,
};
use crate::registry::ItemDetail;
use crate::retry::RetryPolicy;

const ARCHIVE_EXTENSIONS: &[&str] = &[".rar", ".zip", ".7z", ".tar", ".gz", ".bz2", ".xz", ".tgz"];

/// Work types we cannot produce as text.
const UNSUPPORTED_WORK_TYPES: &[&str] = &["presentation", "презентац"];

const SCORE_SYSTEM: &str = "You evaluate orders on a freelance academic writing platform for an \
author who writes text documents only. Answer with JSON only: \
{\"score\": 0-100, \"can_do\": true|false, \"reason\": \"short explanation\"}. \
Score by how well the order can be fulfilled with a written document of good quality.";

/// Why an item is rejected before any reasoning call, if it is.
pub fn gate(detail: &ItemDetail, banned_work_types: &[String]) -> Option<String> {
    let work_type = detail.work_type.to_lowercase();

    if let Some(banned) = banned_work_types
        .iter()
        .find(|b| !b.is_empty() && work_type.contains(&b.to_lowercase()))
    {
        return Some(format!("work type '{}' is banned ({})", detail.work_type, banned));
    }

    if let Some(archive) = detail.attachments.iter().find(|name| {
        let name = name.to_lowercase();
        ARCHIVE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
    }) {
        return Some(format!("archive attachment '{}'", archive));
    }

    if UNSUPPORTED_WORK_TYPES.iter().any(|t| work_type.contains(t)) {
        return Some(format!("unsupported work type '{}'", detail.work_type));
    }

    None
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScoreResult {
    #[serde(deserialize_with = "de_score")]
    pub score: u8,
    #[serde(default = "default_can_do")]
    pub can_do: bool,
    #[serde(default)]
    pub reason: String,
}

fn default_can_do() -> bool {
    true
}

/// Models sometimes answer with floats or out-of-range numbers.
fn de_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(raw.round().clamp(0.0, 100.0) as u8)
}

pub async fn score_item(
    reasoning: &dyn ReasoningClient,
    retry: &RetryPolicy,
    detail: &ItemDetail,
    tally: &mut UsageTally,
) -> Result<ScoreResult, ReasoningError> {
    let mut prompt = format!("Title: {}\nWork type: {}\n", detail.title, detail.work_type);
    if let Some(ref subject) = detail.subject {
        prompt.push_str(&format!("Subject: {}\n", subject));
    }
    if let Some(pages) = detail.pages() {
        prompt.push_str(&format!("Pages: {}\n", pages));
    }
    if let Some(uniqueness) = detail.required_uniqueness {
        prompt.push_str(&format!("Required originality: {:.0}%\n", uniqueness));
    }
    if let Some(ref deadline) = detail.deadline {
        prompt.push_str(&format!("Deadline: {}\n", deadline));
    }
    if !detail.attachments.is_empty() {
        prompt.push_str(&format!("Attachments: {}\n", detail.attachments.join(", ")));
    }
    prompt.push_str(&format!("\nDescription:\n{}", detail.description));

    let request = CompletionRequest::new(prompt)
        .with_system(SCORE_SYSTEM)
        .with_tier(ModelTier::Fast)
        .with_max_tokens(300)
        .with_temperature(0.0)
        .with_purpose("score");

    complete_json_retrying(reasoning, retry, request, tally).await
}
