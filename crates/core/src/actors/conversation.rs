//! Customer conversation: intent classification and short replies.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::reasoning::{
    complete_json, complete_tracked, CompletionRequest, ModelTier, ReasoningClient,
    ReasoningError, UsageTally,
};
use crate::registry::{ConversationMessage, MessageDirection, MessageIntent, WorkItem};

/// Replies are cut to this many sentences.
pub const MAX_REPLY_SENTENCES: usize = 3;

/// Whole words a reply must not contain.
const BANNED_WORDS: &[&str] = &[
    "ai", "gpt", "chatgpt", "openai", "bot", "нейросеть", "нейросети", "нейросетью",
    "нейросетей", "ии", "бот", "ботом",
];

/// Phrases a reply must not contain.
const BANNED_PHRASES: &[&str] = &[
    "artificial intelligence",
    "language model",
    "искусственный интеллект",
    "искусственного интеллекта",
    "языковая модель",
    "языковой модели",
    "автоматически сгенерирован",
];

const FALLBACK_REPLY: &str =
    "Thank you for your message. I have noted everything and will take it into account in the work.";

const CLASSIFY_SYSTEM: &str = "You classify customer messages on a freelance writing platform. \
Answer with JSON only: {\"intent\": \"approval\" | \"question\" | \"other\"}. \
\"approval\" means the customer accepts the delivered draft and asks for nothing more.";

const REPLY_SYSTEM: &str = "You are a freelance author talking to a customer about their order. \
Answer politely in two or three sentences, in the customer's language. \
Never mention automation, bots or text generators.";

#[derive(Debug, Deserialize)]
struct IntentResponse {
    intent: String,
}

fn parse_intent(raw: &str) -> MessageIntent {
    match raw.trim().to_lowercase().as_str() {
        "approval" | "approve" => MessageIntent::Approval,
        "question" => MessageIntent::Question,
        _ => MessageIntent::Other,
    }
}

/// Truncate `text` to its first `max` sentences.
pub fn limit_sentences(text: &str, max: usize) -> String {
    let mut sentences = 0;
    for (idx, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let next = text[idx + c.len_utf8()..].chars().next();
            if next.map_or(true, char::is_whitespace) {
                sentences += 1;
                if sentences == max {
                    return text[..idx + c.len_utf8()].trim().to_string();
                }
            }
        }
    }
    text.trim().to_string()
}

fn contains_banned(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    let banned_word = lower
        .split(|c: char| !c.is_alphanumeric())
        .find_map(|word| BANNED_WORDS.iter().find(|b| **b == word).copied());
    banned_word.or_else(|| BANNED_PHRASES.iter().find(|p| lower.contains(*p)).copied())
}

/// Classifies inbound messages and writes replies.
pub struct ConversationResponder {
    reasoning: Arc<dyn ReasoningClient>,
}

impl ConversationResponder {
    pub fn new(reasoning: Arc<dyn ReasoningClient>) -> Self {
        Self { reasoning }
    }

    pub async fn classify(
        &self,
        item: &WorkItem,
        body: &str,
        tally: &mut UsageTally,
    ) -> Result<MessageIntent, ReasoningError> {
        let prompt = format!(
            "Order: {}\nCurrent stage: {}\n\nCustomer message:\n{}",
            item.title, item.status, body
        );
        let request = CompletionRequest::new(prompt)
            .with_system(CLASSIFY_SYSTEM)
            .with_tier(ModelTier::Fast)
            .with_max_tokens(50)
            .with_temperature(0.0)
            .with_purpose("chat_classify");

        let response: IntentResponse = complete_json(self.reasoning.as_ref(), request, tally).await?;
        let intent = parse_intent(&response.intent);
        debug!(item_id = %item.id, intent = intent.as_str(), "Message classified");
        Ok(intent)
    }

    /// A short reply to `body`, with up to the last ten messages as context.
    pub async fn reply(
        &self,
        item: &WorkItem,
        history: &[ConversationMessage],
        body: &str,
        tally: &mut UsageTally,
    ) -> Result<String, ReasoningError> {
        let mut prompt = format!("Order: {}\nCurrent stage: {}\n", item.title, item.status);
        if let Some(ref detail) = item.detail {
            prompt.push_str(&format!("Work type: {}\n", detail.work_type));
            if let Some(ref deadline) = detail.deadline {
                prompt.push_str(&format!("Deadline: {}\n", deadline));
            }
        }
        prompt.push_str("\nConversation so far:\n");
        let skip = history.len().saturating_sub(10);
        for message in &history[skip..] {
            let who = match message.direction {
                MessageDirection::Inbound => "Customer",
                MessageDirection::Outbound => "Author",
            };
            prompt.push_str(&format!("{}: {}\n", who, message.body));
        }
        prompt.push_str(&format!("\nNew customer message:\n{}", body));

        let request = CompletionRequest::new(prompt)
            .with_system(REPLY_SYSTEM)
            .with_tier(ModelTier::Fast)
            .with_max_tokens(400)
            .with_temperature(0.7)
            .with_purpose("chat_reply");

        let response = complete_tracked(self.reasoning.as_ref(), request, tally).await?;
        let text = limit_sentences(&response.text, MAX_REPLY_SENTENCES);

        if text.is_empty() {
            return Ok(FALLBACK_REPLY.to_string());
        }
        if let Some(word) = contains_banned(&text) {
            warn!(item_id = %item.id, word, "Reply contained a banned word, using fallback");
            return Ok(FALLBACK_REPLY.to_string());
        }
        Ok(text)
    }

    /// Message sent when the draft is uploaded.
    pub fn draft_ready_message(&self, item: &WorkItem) -> String {
        format!(
            "Hello! The draft of \"{}\" is uploaded. Please review it and let me know if it is approved or what should be changed.",
            item.title
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Budget, NewWorkItem};
    use crate::testing::MockReasoningClient;

    fn item() -> WorkItem {
        WorkItem::new(NewWorkItem {
            external_ref: "ref-1".to_string(),
            title: "History essay".to_string(),
            listed_budget: Budget::default(),
        })
    }

    #[test]
    fn test_limit_sentences() {
        let text = "First one. Second one! Third? Fourth.";
        assert_eq!(limit_sentences(text, 3), "First one. Second one! Third?");
        assert_eq!(limit_sentences("Version 2.5 is out. Yes.", 1), "Version 2.5 is out.");
        assert_eq!(limit_sentences("no terminator", 2), "no terminator");
    }

    #[test]
    fn test_banned_words_are_whole_words() {
        assert_eq!(contains_banned("I used GPT for this"), Some("gpt"));
        assert_eq!(contains_banned("Это сделала нейросеть."), Some("нейросеть"));
        assert_eq!(contains_banned("a large language model"), Some("language model"));
        assert_eq!(contains_banned("I will explain the main points"), None);
    }

    #[tokio::test]
    async fn test_classify_approval() {
        let reasoning = Arc::new(MockReasoningClient::new());
        reasoning.push_response(r#"{"intent": "approval"}"#);
        let responder = ConversationResponder::new(reasoning.clone());

        let mut tally = UsageTally::for_item("i-1");
        let intent = responder
            .classify(&item(), "Everything is fine, thanks!", &mut tally)
            .await
            .unwrap();
        assert_eq!(intent, MessageIntent::Approval);
        assert_eq!(tally.calls(), 1);
        assert_eq!(reasoning.requests()[0].tier, ModelTier::Fast);
    }

    #[tokio::test]
    async fn test_reply_is_bounded() {
        let reasoning = Arc::new(MockReasoningClient::new());
        reasoning.push_response("Sure. I will add it. It takes a day. Anything else? Bye.");
        let responder = ConversationResponder::new(reasoning);

        let mut tally = UsageTally::new(None);
        let reply = responder
            .reply(&item(), &[], "Can you add a chapter?", &mut tally)
            .await
            .unwrap();
        assert_eq!(reply, "Sure. I will add it. It takes a day.");
    }

    #[tokio::test]
    async fn test_reply_with_banned_word_falls_back() {
        let reasoning = Arc::new(MockReasoningClient::new());
        reasoning.push_response("The AI wrote it. Done.");
        let responder = ConversationResponder::new(reasoning);

        let mut tally = UsageTally::new(None);
        let reply = responder.reply(&item(), &[], "Who wrote this?", &mut tally).await.unwrap();
        assert_eq!(reply, FALLBACK_REPLY);
    }
}
