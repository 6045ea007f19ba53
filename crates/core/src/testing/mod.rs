//! Testing utilities and mock implementations for E2E tests.
//!
//! This module provides mock implementations of every collaborator trait,
//! so the whole lifecycle can be exercised without a real platform, model or
//! checking service.
//!
//! # Example
//!
//! ```rust,ignore
//! use scrivener_core::testing::{fixtures, MockChecker, MockReasoningClient, MockSite};
//!
//! let site = MockSite::new();
//! let reasoning = fixtures::scripted_reasoning(75);
//! let checker = MockChecker::new();
//!
//! site.add_item(fixtures::summary("101"), fixtures::item_detail("essay", Budget::range(2700, 3000)));
//! checker.push_uniqueness(40.0);
//!
//! // Wire into an Orchestrator...
//! ```

mod mock_checker;
mod mock_reasoning;
mod mock_site;

pub use mock_checker::MockChecker;
pub use mock_reasoning::MockReasoningClient;
pub use mock_site::{MockSite, RecordedBid, RecordedDelivery};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use super::MockReasoningClient;
    use crate::actors::ItemSummary;
    use crate::registry::{Budget, ItemDetail, NewWorkItem, WorkItem};

    const VOCABULARY: [&str; 16] = [
        "the", "study", "shows", "that", "urban", "growth", "changes", "local", "climate",
        "patterns", "while", "policy", "makers", "often", "ignore", "evidence",
    ];

    /// Filler text of exactly `n` words, in sentences of ten words.
    pub fn words(n: u32) -> String {
        let mut out = String::new();
        for i in 0..n as usize {
            let word = VOCABULARY[i % VOCABULARY.len()];
            if i % 10 == 0 {
                if i > 0 {
                    out.push(' ');
                }
                let mut chars = word.chars();
                if let Some(first) = chars.next() {
                    out.extend(first.to_uppercase());
                    out.push_str(chars.as_str());
                }
            } else {
                out.push(' ');
                out.push_str(word);
            }
            if i % 10 == 9 || i + 1 == n as usize {
                out.push('.');
            }
        }
        out
    }

    /// The `N` in a prompt line like "Length: about N words."
    pub fn requested_words(prompt: &str) -> Option<u32> {
        let start = prompt.find("about ")? + "about ".len();
        let digits: String = prompt[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    pub fn summary(external_ref: &str) -> ItemSummary {
        ItemSummary {
            external_ref: external_ref.to_string(),
            title: format!("Item {}", external_ref),
            budget: Budget::default(),
        }
    }

    pub fn item_detail(work_type: &str, budget: Budget) -> ItemDetail {
        ItemDetail {
            title: "Urban heat islands and city planning".to_string(),
            work_type: work_type.to_string(),
            subject: Some("Ecology".to_string()),
            description: "An overview of causes, effects and mitigation.".to_string(),
            pages_min: Some(2),
            pages_max: Some(2),
            budget,
            ..Default::default()
        }
    }

    pub fn work_item(external_ref: &str) -> WorkItem {
        WorkItem::new(NewWorkItem {
            external_ref: external_ref.to_string(),
            title: format!("Item {}", external_ref),
            listed_budget: Budget::default(),
        })
    }

    /// A reasoning mock that answers every pipeline call by purpose.
    ///
    /// Scoring returns `score`; outlines have three sections; section and
    /// expansion calls return exactly the requested word count; classification
    /// always reports approval.
    pub fn scripted_reasoning(score: u8) -> Arc<MockReasoningClient> {
        let client = Arc::new(MockReasoningClient::new());
        client.set_handler(move |request| {
            let text = match request.purpose.as_str() {
                "score" => format!(
                    r#"{{"score": {}, "can_do": true, "reason": "fits the profile"}}"#,
                    score
                ),
                "outline" => r#"{"sections": [
                    {"heading": "Introduction", "level": 1, "target_words": 100},
                    {"heading": "Main part", "level": 1, "target_words": 300},
                    {"heading": "Conclusion", "level": 1, "target_words": 100}
                ]}"#
                .to_string(),
                "references" => "1. Oke T. R. The energetic basis of the urban heat island. 1982.\n\
                                 2. Stewart I. D. Local climate zones. 2012."
                    .to_string(),
                "chat_classify" => r#"{"intent": "approval"}"#.to_string(),
                "chat_reply" => "Thank you for the message. I will take care of it.".to_string(),
                _ => words(requested_words(&request.prompt).unwrap_or(120)),
            };
            Ok(text)
        });
        client
    }

}
