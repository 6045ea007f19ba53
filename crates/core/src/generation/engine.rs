//! Stepwise generation: outline, section expansion, length reconciliation.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::document::{clean_section_text, truncate_words, Document, Section, SectionKind};
use super::{GenerationConfig, GenerationError, GenerationSpec};
use crate::metrics;
use crate::reasoning::{
    complete_json_retrying, complete_retrying, CompletionRequest, ModelTier, ReasoningClient,
    UsageTally,
};
use crate::retry::RetryPolicy;

/// Upper bound on outline entries kept.
const MAX_SECTIONS: usize = 40;

const WRITER_SYSTEM: &str = "You are an experienced academic author. Write in a clear academic \
style with concrete facts, examples and arguments. Do not repeat the section heading. Do not \
use markdown. Write plain paragraphs only.";

const OUTLINE_SYSTEM: &str = "You plan academic papers. Answer with JSON only.";

#[derive(Debug, Deserialize)]
struct OutlineResponse {
    #[serde(default)]
    sections: Vec<OutlineEntry>,
}

#[derive(Debug, Deserialize)]
struct OutlineEntry {
    #[serde(alias = "name")]
    heading: String,
    #[serde(default = "default_level")]
    level: u8,
    #[serde(default)]
    target_words: u32,
}

fn default_level() -> u8 {
    1
}

/// Turns a [`GenerationSpec`] into a [`Document`] through bounded-context
/// reasoning calls.
pub struct ContentEngine {
    reasoning: Arc<dyn ReasoningClient>,
    retry: RetryPolicy,
    config: GenerationConfig,
}

impl ContentEngine {
    pub fn new(reasoning: Arc<dyn ReasoningClient>, config: GenerationConfig) -> Self {
        Self {
            reasoning,
            retry: RetryPolicy::default(),
            config,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub async fn generate(
        &self,
        spec: &GenerationSpec,
        tally: &mut UsageTally,
    ) -> Result<Document, GenerationError> {
        let started = Instant::now();
        let result = self.generate_inner(spec, tally).await;
        let label = if result.is_ok() { "ok" } else { "failed" };
        metrics::GENERATION_DURATION
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn generate_inner(
        &self,
        spec: &GenerationSpec,
        tally: &mut UsageTally,
    ) -> Result<Document, GenerationError> {
        let target = spec.length.target_words();
        info!(title = %spec.title, work_type = %spec.work_type, target_words = target, "Generating document");

        let outline = self.outline(spec, tally).await?;
        let mut document = Document::new(&spec.title);
        document.sections = outline;

        self.expand_sections(spec, &mut document, tally).await?;
        self.reconcile_length(spec, &mut document, tally).await?;

        if self.config.needs_references(&spec.work_type) {
            let references = self.references(spec, tally).await?;
            document.sections.push(references);
        }

        info!(
            title = %spec.title,
            sections = document.sections.len(),
            words = document.body_word_count(),
            target_words = target,
            "Document generated"
        );
        Ok(document)
    }

    /// Ask for an outline and fit its targets to the requested length.
    async fn outline(
        &self,
        spec: &GenerationSpec,
        tally: &mut UsageTally,
    ) -> Result<Vec<Section>, GenerationError> {
        let target = spec.length.target_words();
        let mut prompt = format!(
            "Plan a {} titled \"{}\".\nTotal length: {} words.\n",
            spec.work_type, spec.title, target
        );
        if let Some(ref subject) = spec.subject {
            prompt.push_str(&format!("Subject: {}\n", subject));
        }
        if !spec.description.is_empty() {
            prompt.push_str(&format!("Customer requirements: {}\n", excerpt(&spec.description, 500)));
        }
        if let Some(ref material) = spec.reference_material {
            prompt.push_str(&format!("Reference material: {}\n", excerpt(material, 500)));
        }
        prompt.push_str(
            "\nReturn JSON: {\"sections\": [{\"heading\": \"...\", \"level\": 1, \"target_words\": 500}]}. \
             The target_words must add up to the total length. Each section is written by a separate request.",
        );

        let request = CompletionRequest::new(prompt)
            .with_system(OUTLINE_SYSTEM)
            .with_tier(ModelTier::Fast)
            .with_temperature(0.3)
            .with_max_tokens(1024)
            .with_purpose("outline");

        let response: OutlineResponse =
            complete_json_retrying(self.reasoning.as_ref(), &self.retry, request, tally)
                .await
                .map_err(|e| GenerationError::reasoning("outline", e))?;

        let sections = normalize_outline(&spec.title, response.sections, target);
        debug!(title = %spec.title, sections = sections.len(), "Outline ready");
        Ok(sections)
    }

    async fn expand_sections(
        &self,
        spec: &GenerationSpec,
        document: &mut Document,
        tally: &mut UsageTally,
    ) -> Result<(), GenerationError> {
        let plan = format_plan(&document.sections);
        let mut summaries: Vec<String> = Vec::new();

        for idx in 0..document.sections.len() {
            let (heading, target_words) = {
                let section = &document.sections[idx];
                (section.heading.clone(), section.target_words)
            };

            let window = summaries.len().saturating_sub(self.config.summary_window);
            let mut prompt = self.base_prompt(spec);
            prompt.push_str(&format!("\nPlan:\n{}\n", plan));
            prompt.push_str(&format!("\nWrite the section: {}\n", heading));
            prompt.push_str(&format!("Length: about {} words.\n", target_words));
            if !summaries[window..].is_empty() {
                prompt.push_str(&format!(
                    "\nPrevious sections in brief:\n{}\n",
                    summaries[window..].join("\n")
                ));
            }

            let request = CompletionRequest::new(prompt)
                .with_system(WRITER_SYSTEM)
                .with_temperature(self.config.temperature)
                .with_max_tokens(max_tokens_for(target_words))
                .with_purpose("section");

            let response = complete_retrying(self.reasoning.as_ref(), &self.retry, request, tally)
                .await
                .map_err(|e| GenerationError::reasoning("section", e))?;

            let body = clean_section_text(&heading, &response.text);
            if body.is_empty() {
                return Err(GenerationError::EmptyOutput { section: heading });
            }

            summaries.push(summarize(&heading, &body, self.config.summary_chars));
            document.sections[idx].body = body;
        }
        Ok(())
    }

    /// Bring the body length within tolerance of the target.
    ///
    /// Short documents get the sections furthest below their own targets
    /// expanded, for a bounded number of rounds. Long documents are trimmed.
    async fn reconcile_length(
        &self,
        spec: &GenerationSpec,
        document: &mut Document,
        tally: &mut UsageTally,
    ) -> Result<(), GenerationError> {
        let target = spec.length.target_words();
        let (lo, hi) = spec.length.bounds();
        let mut rounds = 0;

        loop {
            let words = document.body_word_count();
            if words > hi {
                trim_to_target(document, target);
                debug!(title = %spec.title, before = words, after = document.body_word_count(), "Trimmed document");
                return Ok(());
            }
            if words >= lo {
                return Ok(());
            }
            if rounds == self.config.max_expansion_rounds {
                warn!(
                    title = %spec.title,
                    words,
                    target_words = target,
                    rounds,
                    "Document still short after all expansion rounds"
                );
                return Ok(());
            }
            rounds += 1;

            let shortfall = target - words;
            let picks = pick_for_expansion(document, self.config.sections_per_round);
            let total_deficit: i64 = picks.iter().map(|(_, d)| *d).sum::<i64>().max(1);

            debug!(round = rounds, words, target_words = target, sections = picks.len(), "Expanding");

            for (idx, deficit) in picks {
                let share = (shortfall as i64 * deficit + total_deficit - 1) / total_deficit;
                let needed = share.max(30) as u32;
                self.expand_one(spec, document, idx, needed, tally).await?;
            }
        }
    }

    async fn expand_one(
        &self,
        spec: &GenerationSpec,
        document: &mut Document,
        idx: usize,
        needed: u32,
        tally: &mut UsageTally,
    ) -> Result<(), GenerationError> {
        let section = &document.sections[idx];
        let mut prompt = self.base_prompt(spec);
        prompt.push_str(&format!("\nSection: {}\n", section.heading));
        prompt.push_str(&format!(
            "The section currently ends with:\n{}\n",
            tail(&section.body, 1500)
        ));
        prompt.push_str(&format!(
            "\nContinue the section with new examples, details and arguments. Length: about {} words. \
             Return only the new paragraphs, without repeating existing text.",
            needed
        ));

        let request = CompletionRequest::new(prompt)
            .with_system(WRITER_SYSTEM)
            .with_temperature(self.config.temperature)
            .with_max_tokens(max_tokens_for(needed))
            .with_purpose("expand");

        let response = complete_retrying(self.reasoning.as_ref(), &self.retry, request, tally)
            .await
            .map_err(|e| GenerationError::reasoning("expand", e))?;

        let addition = clean_section_text(&document.sections[idx].heading, &response.text);
        if !addition.is_empty() {
            let body = &mut document.sections[idx].body;
            body.push_str("\n\n");
            body.push_str(&addition);
        }
        Ok(())
    }

    async fn references(
        &self,
        spec: &GenerationSpec,
        tally: &mut UsageTally,
    ) -> Result<Section, GenerationError> {
        let mut prompt = format!(
            "List 10 to 15 real, well-known sources for a {} titled \"{}\".",
            spec.work_type, spec.title
        );
        if let Some(ref subject) = spec.subject {
            prompt.push_str(&format!(" Subject: {}.", subject));
        }
        prompt.push_str(
            " Use only sources that certainly exist. Format them as a numbered bibliography, \
             one source per line, and return only the list.",
        );

        let request = CompletionRequest::new(prompt)
            .with_system(WRITER_SYSTEM)
            .with_temperature(0.3)
            .with_max_tokens(1500)
            .with_purpose("references");

        let response = complete_retrying(self.reasoning.as_ref(), &self.retry, request, tally)
            .await
            .map_err(|e| GenerationError::reasoning("references", e))?;

        let body = response
            .text
            .lines()
            .map(|l| l.trim().trim_start_matches(['-', '*']).trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut section = Section::new("References", 1, 0);
        section.body = body;
        section.kind = SectionKind::References;
        Ok(section)
    }

    fn base_prompt(&self, spec: &GenerationSpec) -> String {
        let mut prompt = format!("Work: {} titled \"{}\".\n", spec.work_type, spec.title);
        if let Some(ref subject) = spec.subject {
            prompt.push_str(&format!("Subject: {}\n", subject));
        }
        if !spec.description.is_empty() {
            prompt.push_str(&format!("Customer requirements: {}\n", excerpt(&spec.description, 500)));
        }
        if let Some(ref material) = spec.reference_material {
            prompt.push_str(&format!("Reference material: {}\n", excerpt(material, 500)));
        }
        if let Some(uniqueness) = spec.required_uniqueness {
            prompt.push_str(&format!(
                "Required originality: {:.0}%. Avoid clichés and stock phrases.\n",
                uniqueness
            ));
        }
        prompt
    }
}

/// Scale outline targets so they sum to `target`.
///
/// An outline with fewer than two entries becomes a single section.
fn normalize_outline(title: &str, entries: Vec<OutlineEntry>, target: u32) -> Vec<Section> {
    let entries: Vec<OutlineEntry> = entries
        .into_iter()
        .filter(|e| !e.heading.trim().is_empty())
        .take(MAX_SECTIONS)
        .collect();

    if entries.len() < 2 {
        return vec![Section::new(title, 1, target)];
    }

    let count = entries.len() as u64;
    let listed: u64 = entries.iter().map(|e| e.target_words as u64).sum();
    let mut sections: Vec<Section> = entries
        .iter()
        .map(|e| {
            let share = if listed == 0 {
                target as u64 / count
            } else {
                e.target_words as u64 * target as u64 / listed
            };
            Section::new(e.heading.trim(), e.level, share as u32)
        })
        .collect();

    // Rounding leftovers go to the largest section.
    let assigned: u32 = sections.iter().map(|s| s.target_words).sum();
    if let Some(largest) = sections.iter_mut().max_by_key(|s| s.target_words) {
        largest.target_words += target.saturating_sub(assigned);
    }
    sections
}

/// Body sections with the largest deficits, at most `limit`.
///
/// Falls back to the shortest body section when none is below its target.
fn pick_for_expansion(document: &Document, limit: usize) -> Vec<(usize, i64)> {
    let mut candidates: Vec<(usize, i64)> = document
        .sections
        .iter()
        .enumerate()
        .filter(|(_, s)| s.kind == SectionKind::Body)
        .map(|(idx, s)| (idx, s.deficit()))
        .filter(|(_, d)| *d > 0)
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    candidates.truncate(limit.max(1));

    if candidates.is_empty() {
        if let Some((idx, _)) = document
            .sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == SectionKind::Body)
            .min_by_key(|(_, s)| s.word_count())
        {
            candidates.push((idx, 1));
        }
    }
    candidates
}

/// Cut the sections furthest above their own targets until the body is back
/// at `target` words.
fn trim_to_target(document: &mut Document, target: u32) {
    let mut excess = document.body_word_count().saturating_sub(target);
    let mut order: Vec<usize> = (0..document.sections.len())
        .filter(|i| document.sections[*i].kind == SectionKind::Body)
        .collect();
    order.sort_by_key(|i| std::cmp::Reverse(-document.sections[*i].deficit()));

    for idx in order {
        if excess == 0 {
            break;
        }
        let section = &mut document.sections[idx];
        let surplus = (-section.deficit()).max(0) as u32;
        let cut = surplus.min(excess);
        if cut == 0 {
            continue;
        }
        let before = section.word_count();
        section.body = truncate_words(&section.body, before - cut);
        excess = excess.saturating_sub(before - section.word_count());
    }
}

fn format_plan(sections: &[Section]) -> String {
    sections
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {} (~{} words)", i + 1, s.heading, s.target_words))
        .collect::<Vec<_>>()
        .join("\n")
}

fn summarize(heading: &str, body: &str, max_chars: usize) -> String {
    let text = excerpt(body, max_chars);
    if text.len() < body.len() {
        format!("{}: {}...", heading, text)
    } else {
        format!("{}: {}", heading, text)
    }
}

/// First `max_chars` characters of `text`.
fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Last `max_chars` characters of `text`.
fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

fn max_tokens_for(words: u32) -> u32 {
    (words.saturating_mul(7) / 3).clamp(1500, 16000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::LengthTarget;
    use crate::reasoning::ReasoningError;
    use crate::retry::Classify;
    use crate::testing::{fixtures, MockReasoningClient};

    fn entry(heading: &str, target_words: u32) -> OutlineEntry {
        OutlineEntry {
            heading: heading.to_string(),
            level: 1,
            target_words,
        }
    }

    fn engine(client: Arc<MockReasoningClient>) -> ContentEngine {
        ContentEngine::new(client, GenerationConfig::default()).with_retry(RetryPolicy::none())
    }

    #[test]
    fn test_normalize_outline_scales_targets() {
        let sections = normalize_outline(
            "T",
            vec![entry("Intro", 100), entry("Body", 300), entry("End", 100)],
            1000,
        );
        let targets: Vec<u32> = sections.iter().map(|s| s.target_words).collect();
        assert_eq!(targets, vec![200, 600, 200]);
    }

    #[test]
    fn test_normalize_outline_without_targets() {
        let sections = normalize_outline("T", vec![entry("A", 0), entry("B", 0), entry("C", 0)], 1000);
        assert_eq!(sections.iter().map(|s| s.target_words).sum::<u32>(), 1000);
    }

    #[test]
    fn test_single_entry_outline_falls_back() {
        let sections = normalize_outline("My title", vec![entry("Only", 10)], 750);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "My title");
        assert_eq!(sections[0].target_words, 750);

        assert_eq!(normalize_outline("T", Vec::new(), 500).len(), 1);
    }

    #[test]
    fn test_trim_to_target() {
        let mut doc = Document::new("T");
        let mut a = Section::new("A", 1, 10);
        a.body = fixtures::words(30);
        let mut b = Section::new("B", 1, 10);
        b.body = fixtures::words(10);
        doc.sections = vec![a, b];

        trim_to_target(&mut doc, 20);
        assert!(doc.body_word_count() <= 21);
        assert_eq!(doc.sections[1].word_count(), 10);
    }

    #[test]
    fn test_excerpt_and_tail_are_char_safe() {
        assert_eq!(excerpt("привет мир", 6), "привет");
        assert_eq!(tail("привет мир", 3), "мир");
    }

    #[tokio::test]
    async fn test_rolling_summary_is_bounded() {
        let client = Arc::new(MockReasoningClient::new());
        client.push_response(
            r#"{"sections": [{"heading": "S1", "target_words": 50}, {"heading": "S2", "target_words": 50},
                {"heading": "S3", "target_words": 50}, {"heading": "S4", "target_words": 50},
                {"heading": "S5", "target_words": 50}]}"#,
        );
        client.set_handler(|req| Ok(fixtures::words(fixtures::requested_words(&req.prompt).unwrap_or(50))));

        let spec = GenerationSpec::new("Topic", "Essay", LengthTarget::words(250, 0.15));
        let mut tally = UsageTally::new(None);
        engine(client.clone()).generate(&spec, &mut tally).await.unwrap();

        let sections = client.requests_for("section");
        assert_eq!(sections.len(), 5);
        assert!(!sections[0].prompt.contains("Previous sections"));
        let last = &sections[4].prompt;
        assert!(!last.contains("S1: "));
        assert!(last.contains("S2: ") && last.contains("S3: ") && last.contains("S4: "));
    }

    #[tokio::test]
    async fn test_short_sections_are_expanded() {
        let client = Arc::new(MockReasoningClient::new());
        client.push_response(
            r#"{"sections": [{"heading": "A", "target_words": 300}, {"heading": "B", "target_words": 300}]}"#,
        );
        // Sections come back at half length, expansions at full length.
        client.set_handler(|req| {
            let n = fixtures::requested_words(&req.prompt).unwrap_or(50);
            let n = if req.purpose == "section" { n / 2 } else { n };
            Ok(fixtures::words(n))
        });

        let spec = GenerationSpec::new("Topic", "Essay", LengthTarget::words(600, 0.15));
        let mut tally = UsageTally::new(None);
        let doc = engine(client.clone()).generate(&spec, &mut tally).await.unwrap();

        assert!(spec.length.accepts(doc.body_word_count()));
        assert!(!client.requests_for("expand").is_empty());
        assert_eq!(tally.calls(), client.request_count());
    }

    #[tokio::test]
    async fn test_references_appended_for_coursework() {
        let client = Arc::new(MockReasoningClient::new());
        client.push_response(r#"{"sections": []}"#);
        client.set_handler(|req| {
            if req.purpose == "references" {
                Ok("1. Smith J. Economics. 2010.\n2. Doe A. Markets. 2015.".to_string())
            } else {
                Ok(fixtures::words(fixtures::requested_words(&req.prompt).unwrap_or(50)))
            }
        });

        let spec = GenerationSpec::new("Topic", "Coursework", LengthTarget::words(300, 0.15));
        let mut tally = UsageTally::new(None);
        let doc = engine(client).generate(&spec, &mut tally).await.unwrap();

        assert_eq!(doc.sections.len(), 2);
        let refs = doc.sections.last().unwrap();
        assert_eq!(refs.kind, SectionKind::References);
        assert_eq!(refs.body.lines().count(), 2);
        assert!(spec.length.accepts(doc.body_word_count()));
    }

    #[tokio::test]
    async fn test_reasoning_failure_is_permanent() {
        let client = Arc::new(MockReasoningClient::new());
        client.push_error(ReasoningError::Timeout(std::time::Duration::from_secs(1)));

        let spec = GenerationSpec::new("Topic", "Essay", LengthTarget::words(300, 0.15));
        let mut tally = UsageTally::new(None);
        let err = engine(client).generate(&spec, &mut tally).await.unwrap_err();
        assert!(matches!(err, GenerationError::Reasoning { stage: "outline", .. }));
        assert!(!err.is_transient());
    }
}
