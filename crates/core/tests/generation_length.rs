//! Length reconciliation against a model that under- or over-delivers.

use std::sync::Arc;

use scrivener_core::generation::{LengthTarget, SectionKind};
use scrivener_core::reasoning::UsageTally;
use scrivener_core::testing::{fixtures, MockReasoningClient};
use scrivener_core::{ContentEngine, GenerationConfig, GenerationSpec, RetryPolicy};

const TARGET_WORDS: u32 = 2000;
const TOLERANCE: f32 = 0.15;

fn outline_json(sections: usize) -> String {
    let entries: Vec<String> = (0..sections)
        .map(|i| {
            format!(
                r#"{{"heading": "Part {}", "level": 1, "target_words": 100}}"#,
                i + 1
            )
        })
        .collect();
    format!(r#"{{"sections": [{}]}}"#, entries.join(", "))
}

/// Sections come back at `section_ratio` of the requested length; expansions
/// return `expand_words` or exactly what was asked for.
fn model(sections: usize, section_ratio: f64, expand_words: Option<u32>) -> Arc<MockReasoningClient> {
    let client = Arc::new(MockReasoningClient::new());
    let outline = outline_json(sections);
    client.set_handler(move |request| {
        let requested = fixtures::requested_words(&request.prompt).unwrap_or(100);
        let text = match request.purpose.as_str() {
            "outline" => outline.clone(),
            "section" => fixtures::words((requested as f64 * section_ratio) as u32),
            "expand" => fixtures::words(expand_words.unwrap_or(requested)),
            "references" => "1. Oke T. R. Boundary Layer Climates. 1987.\n\
                             2. Stewart I. D., Oke T. R. Local climate zones. 2012."
                .to_string(),
            other => panic!("unexpected request purpose {}", other),
        };
        Ok(text)
    });
    client
}

fn engine(reasoning: Arc<MockReasoningClient>) -> ContentEngine {
    ContentEngine::new(reasoning, GenerationConfig::default()).with_retry(RetryPolicy::none())
}

fn essay_spec() -> GenerationSpec {
    GenerationSpec::new(
        "Urban heat islands",
        "essay",
        LengthTarget::words(TARGET_WORDS, TOLERANCE),
    )
}

#[tokio::test]
async fn test_short_sections_are_expanded_into_range() {
    let (lo, hi) = LengthTarget::words(TARGET_WORDS, TOLERANCE).bounds();

    for sections in [1, 5, 20] {
        let reasoning = model(sections, 0.6, None);
        let mut tally = UsageTally::default();
        let document = engine(reasoning.clone())
            .generate(&essay_spec(), &mut tally)
            .await
            .unwrap();

        let words = document.body_word_count();
        assert!(
            (lo..=hi).contains(&words),
            "{} sections produced {} words, expected {}..={}",
            sections,
            words,
            lo,
            hi
        );
        assert_eq!(document.sections.len(), sections);
        assert!(!reasoning.requests_for("expand").is_empty());
        assert_eq!(reasoning.requests_for("section").len(), sections);
    }
}

#[tokio::test]
async fn test_single_entry_outline_uses_title_as_section() {
    let reasoning = model(1, 0.6, None);
    let document = engine(reasoning)
        .generate(&essay_spec(), &mut UsageTally::default())
        .await
        .unwrap();

    assert_eq!(document.sections.len(), 1);
    assert_eq!(document.sections[0].heading, "Urban heat islands");
    assert_eq!(document.sections[0].target_words, TARGET_WORDS);
}

#[tokio::test]
async fn test_expansion_stops_after_round_limit() {
    let reasoning = model(1, 0.6, Some(5));
    let config = GenerationConfig::default();
    let rounds = config.max_expansion_rounds;

    let document = engine(reasoning.clone())
        .generate(&essay_spec(), &mut UsageTally::default())
        .await
        .unwrap();

    // Still short, but returned instead of looping
    assert!(document.body_word_count() < TARGET_WORDS);
    assert_eq!(reasoning.requests_for("expand").len(), rounds as usize);
}

#[tokio::test]
async fn test_overlong_sections_are_trimmed() {
    let reasoning = model(5, 1.6, None);
    let document = engine(reasoning.clone())
        .generate(&essay_spec(), &mut UsageTally::default())
        .await
        .unwrap();

    assert!(LengthTarget::words(TARGET_WORDS, TOLERANCE).accepts(document.body_word_count()));
    assert!(reasoning.requests_for("expand").is_empty());
}

#[tokio::test]
async fn test_references_do_not_count_toward_length() {
    let reasoning = model(5, 1.0, None);
    let spec = GenerationSpec::new(
        "Urban heat islands",
        "coursework",
        LengthTarget::words(TARGET_WORDS, TOLERANCE),
    );
    let document = engine(reasoning.clone())
        .generate(&spec, &mut UsageTally::default())
        .await
        .unwrap();

    let last = document.sections.last().unwrap();
    assert_eq!(last.kind, SectionKind::References);
    assert_eq!(document.body_word_count(), TARGET_WORDS);
    assert!(document.word_count() > document.body_word_count());
    assert_eq!(reasoning.requests_for("references").len(), 1);
}
