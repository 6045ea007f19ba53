//! The check/rewrite loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{extract_samples, OriginalityConfig, OriginalityError};
use crate::generation::{clean_section_text, Document, SectionKind};
use crate::metrics;
use crate::reasoning::{complete_retrying, CompletionRequest, ReasoningClient, UsageTally};
use crate::retry::RetryPolicy;
use crate::verification::{check_text, CheckReport, OriginalityChecker, VerificationConfig};

const REWRITE_SYSTEM: &str = "You rewrite academic text to make it original. Preserve the meaning \
and the academic style, change sentence structure and wording as much as possible, keep the \
length within 10% of the original, and return only the rewritten text.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Average over a few excerpts.
    Sampled,
    /// The whole document.
    Full,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Sampled => "sample",
            CheckKind::Full => "full",
        }
    }
}

/// Result of one verification round.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub kind: CheckKind,
    pub uniqueness: f32,
    pub report: CheckReport,
    pub passed: bool,
}

/// What follows a verification round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Rewrite,
    /// Below threshold with no checks left.
    Exhausted,
}

/// Final result of [`OriginalityLoop::verify`].
#[derive(Debug, Clone)]
pub struct Verdict {
    pub uniqueness: f32,
    pub accepted: bool,
    pub checks: u32,
    pub rewrites: u32,
    pub document: Document,
}

/// Verifies documents against a uniqueness threshold and rewrites the
/// weakest passages until they pass or the check budget runs out.
pub struct OriginalityLoop {
    checker: Arc<dyn OriginalityChecker>,
    reasoning: Arc<dyn ReasoningClient>,
    retry: RetryPolicy,
    config: OriginalityConfig,
    poll_interval: Duration,
    timeout: Duration,
}

impl OriginalityLoop {
    pub fn new(
        checker: Arc<dyn OriginalityChecker>,
        reasoning: Arc<dyn ReasoningClient>,
        config: OriginalityConfig,
    ) -> Self {
        let verification = VerificationConfig::default();
        Self {
            checker,
            reasoning,
            retry: RetryPolicy::default(),
            config,
            poll_interval: verification.poll_interval(),
            timeout: verification.timeout(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_polling(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &OriginalityConfig {
        &self.config
    }

    /// The item's own requirement if it has one, else the configured default.
    pub fn threshold_for(&self, required: Option<f32>) -> f32 {
        required
            .filter(|v| *v > 0.0)
            .unwrap_or(self.config.threshold)
            .clamp(0.0, 100.0)
    }

    /// Run the whole loop: at most `max_checks` verification rounds with a
    /// rewrite between consecutive ones.
    pub async fn verify(
        &self,
        document: Document,
        threshold: f32,
        tally: &mut UsageTally,
    ) -> Result<Verdict, OriginalityError> {
        let mut document = document;
        let mut checks = 0;
        let mut rewrites = 0;

        loop {
            let outcome = self.check(&document, threshold).await?;
            checks += 1;

            match self.decide(outcome.uniqueness, threshold, checks) {
                Decision::Accept => {
                    return Ok(Verdict {
                        uniqueness: outcome.uniqueness,
                        accepted: true,
                        checks,
                        rewrites,
                        document,
                    })
                }
                Decision::Exhausted => {
                    warn!(
                        title = %document.title,
                        uniqueness = outcome.uniqueness,
                        threshold,
                        checks,
                        "Originality checks exhausted below threshold"
                    );
                    return Ok(Verdict {
                        uniqueness: outcome.uniqueness,
                        accepted: false,
                        checks,
                        rewrites,
                        document,
                    });
                }
                Decision::Rewrite => {
                    let passages = self.select_passages(&document, &outcome.report);
                    document = self
                        .repair(&document, &passages, Some(outcome.uniqueness), threshold, tally)
                        .await?;
                    rewrites += 1;
                }
            }
        }
    }

    pub fn decide(&self, uniqueness: f32, threshold: f32, checks_done: u32) -> Decision {
        if uniqueness >= threshold {
            Decision::Accept
        } else if checks_done < self.config.max_checks {
            Decision::Rewrite
        } else {
            Decision::Exhausted
        }
    }

    /// One verification round: sampled first when the text is long enough,
    /// then the full document unless the samples clear the margin.
    pub async fn check(
        &self,
        document: &Document,
        threshold: f32,
    ) -> Result<CheckOutcome, OriginalityError> {
        let text = document.plain_text();
        if text.trim().is_empty() {
            return Err(OriginalityError::EmptyDocument);
        }

        if self.config.sampling_enabled && text.chars().count() >= self.config.min_sample_text_chars {
            if let Some(average) = self.sampled_uniqueness(&text).await {
                let bar = threshold + self.config.sample_margin;
                if average >= bar {
                    info!(title = %document.title, uniqueness = average, threshold, "Passed on samples");
                    return Ok(CheckOutcome {
                        kind: CheckKind::Sampled,
                        uniqueness: average,
                        report: CheckReport::new(average),
                        passed: true,
                    });
                }
                debug!(uniqueness = average, bar, "Samples below margin, running full check");
            }
        }

        let report = self.run_check(&text).await?;
        metrics::ORIGINALITY_CHECKS
            .with_label_values(&[CheckKind::Full.as_str()])
            .inc();
        info!(
            title = %document.title,
            uniqueness = report.uniqueness,
            threshold,
            matches = report.matches.len(),
            "Full originality check"
        );
        Ok(CheckOutcome {
            kind: CheckKind::Full,
            uniqueness: report.uniqueness,
            passed: report.uniqueness >= threshold,
            report,
        })
    }

    /// Average uniqueness over excerpts, or `None` if any excerpt failed.
    async fn sampled_uniqueness(&self, text: &str) -> Option<f32> {
        let samples = {
            let mut rng = rand::rng();
            extract_samples(text, &self.config, &mut rng)
        };
        if samples.is_empty() {
            return None;
        }

        let mut total = 0.0;
        for sample in &samples {
            match self.run_check(sample).await {
                Ok(report) => {
                    metrics::ORIGINALITY_CHECKS
                        .with_label_values(&[CheckKind::Sampled.as_str()])
                        .inc();
                    total += report.uniqueness;
                }
                Err(e) => {
                    warn!("Sample check failed, falling back to full check: {}", e);
                    return None;
                }
            }
        }
        Some(total / samples.len() as f32)
    }

    async fn run_check(&self, text: &str) -> Result<CheckReport, OriginalityError> {
        let report = self
            .retry
            .run("originality_check", || {
                check_text(self.checker.as_ref(), text, self.poll_interval, self.timeout)
            })
            .await?;
        Ok(report)
    }

    /// Body sections to rewrite, weakest first.
    ///
    /// Sections are ranked by how many matched words fall inside them. With
    /// no match detail the longest sections are taken.
    pub fn select_passages(&self, document: &Document, report: &CheckReport) -> Vec<usize> {
        let limit = self.config.max_passages_per_round.max(1);
        let ranges = document.section_word_ranges();

        let mut coverage: Vec<(usize, usize)> = ranges
            .iter()
            .filter(|(idx, _)| document.sections[*idx].kind == SectionKind::Body)
            .map(|(idx, range)| {
                let hits = report
                    .matches
                    .iter()
                    .flat_map(|m| m.word_positions.iter())
                    .filter(|pos| range.contains(pos))
                    .count();
                (*idx, hits)
            })
            .filter(|(_, hits)| *hits > 0)
            .collect();

        if coverage.is_empty() {
            coverage = document
                .sections
                .iter()
                .enumerate()
                .filter(|(_, s)| s.kind == SectionKind::Body)
                .map(|(idx, s)| (idx, s.word_count() as usize))
                .collect();
        }

        coverage.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        coverage.into_iter().take(limit).map(|(idx, _)| idx).collect()
    }

    /// Rewrite the given sections and return the new document.
    pub async fn repair(
        &self,
        document: &Document,
        passages: &[usize],
        current: Option<f32>,
        threshold: f32,
        tally: &mut UsageTally,
    ) -> Result<Document, OriginalityError> {
        let mut repaired = document.clone();

        for &idx in passages {
            let Some(section) = repaired.sections.get(idx) else {
                continue;
            };
            let heading = section.heading.clone();
            let chunks = chunk_paragraphs(&section.body, self.config.rewrite_chunk_chars);

            let mut rewritten = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let text = self.rewrite_chunk(&heading, &chunk, current, threshold, tally).await?;
                rewritten.push(text);
            }
            repaired.sections[idx].body = rewritten.join("\n\n");
            debug!(section = %heading, "Section rewritten");
        }
        Ok(repaired)
    }

    async fn rewrite_chunk(
        &self,
        heading: &str,
        chunk: &str,
        current: Option<f32>,
        threshold: f32,
        tally: &mut UsageTally,
    ) -> Result<String, OriginalityError> {
        let mut prompt = String::from("Rewrite the following academic text.\n");
        match current {
            Some(current) => prompt.push_str(&format!(
                "Current originality: {:.0}%. Required: {:.0}%.\n",
                current, threshold
            )),
            None => prompt.push_str(&format!("Required originality: {:.0}%.\n", threshold)),
        }
        prompt.push_str(&format!("\nText:\n\n{}", chunk));

        let max_tokens = ((chunk.chars().count() / 3) as u32).clamp(2000, 16000);
        let request = CompletionRequest::new(prompt)
            .with_system(REWRITE_SYSTEM)
            .with_temperature(self.config.rewrite_temperature)
            .with_max_tokens(max_tokens)
            .with_purpose("rewrite");

        let response =
            complete_retrying(self.reasoning.as_ref(), &self.retry, request, tally).await?;
        let text = clean_section_text(heading, &response.text);
        if text.is_empty() {
            warn!(section = %heading, "Rewrite came back empty, keeping original text");
            return Ok(chunk.to_string());
        }
        Ok(text)
    }
}

/// Group paragraphs into chunks of at most `max_chars` characters. A single
/// longer paragraph becomes its own chunk.
fn chunk_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut length = 0;

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let paragraph_len = paragraph.chars().count() + 2;
        if length + paragraph_len > max_chars && !current.is_empty() {
            chunks.push(current.join("\n\n"));
            current.clear();
            length = 0;
        }
        current.push(paragraph);
        length += paragraph_len;
    }
    if !current.is_empty() {
        chunks.push(current.join("\n\n"));
    }
    chunks
}
