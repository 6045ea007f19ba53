//! Generation requests and engine configuration.

use serde::{Deserialize, Serialize};

use crate::registry::{FormattingRequirements, ItemDetail};

/// Words on one standard page.
pub const WORDS_PER_PAGE: u32 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    Words,
    Pages,
}

/// Requested document length with a relative tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LengthTarget {
    pub amount: u32,
    pub unit: LengthUnit,
    /// Accepted relative deviation, e.g. 0.15 for ±15%.
    pub tolerance: f32,
}

impl LengthTarget {
    pub fn words(amount: u32, tolerance: f32) -> Self {
        Self {
            amount,
            unit: LengthUnit::Words,
            tolerance,
        }
    }

    pub fn pages(amount: u32, tolerance: f32) -> Self {
        Self {
            amount,
            unit: LengthUnit::Pages,
            tolerance,
        }
    }

    pub fn target_words(&self) -> u32 {
        match self.unit {
            LengthUnit::Words => self.amount,
            LengthUnit::Pages => self.amount * WORDS_PER_PAGE,
        }
    }

    /// Inclusive word bounds.
    pub fn bounds(&self) -> (u32, u32) {
        let target = self.target_words() as f64;
        let tolerance = self.tolerance as f64;
        let lo = (target * (1.0 - tolerance) - 1e-6).ceil().max(0.0) as u32;
        let hi = (target * (1.0 + tolerance) + 1e-6).floor() as u32;
        (lo, hi)
    }

    pub fn accepts(&self, words: u32) -> bool {
        let (lo, hi) = self.bounds();
        (lo..=hi).contains(&words)
    }
}

/// What to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSpec {
    pub title: String,
    pub work_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub description: String,
    pub length: LengthTarget,
    /// Summarized source material to draw on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_material: Option<String>,
    #[serde(default)]
    pub formatting: FormattingRequirements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_uniqueness: Option<f32>,
}

impl GenerationSpec {
    pub fn new(title: impl Into<String>, work_type: impl Into<String>, length: LengthTarget) -> Self {
        Self {
            title: title.into(),
            work_type: work_type.into(),
            subject: None,
            description: String::new(),
            length,
            reference_material: None,
            formatting: FormattingRequirements::default(),
            required_uniqueness: None,
        }
    }

    /// Build a request from a fetched item detail.
    pub fn from_detail(detail: &ItemDetail, config: &GenerationConfig) -> Self {
        let pages = detail.pages().unwrap_or(config.default_pages);
        Self {
            title: detail.title.clone(),
            work_type: detail.work_type.clone(),
            subject: detail.subject.clone(),
            description: detail.description.clone(),
            length: LengthTarget::pages(pages, config.tolerance),
            reference_material: detail.formatting.notes.clone(),
            formatting: detail.formatting.clone(),
            required_uniqueness: detail.required_uniqueness,
        }
    }

    pub fn with_reference_material(mut self, material: impl Into<String>) -> Self {
        self.reference_material = Some(material.into());
        self
    }
}

/// Content generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Pages to write when the item does not say.
    #[serde(default = "default_pages")]
    pub default_pages: u32,
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    #[serde(default = "default_max_expansion_rounds")]
    pub max_expansion_rounds: u32,
    /// Sections expanded per reconciliation round.
    #[serde(default = "default_sections_per_round")]
    pub sections_per_round: usize,
    /// Previous sections included in the rolling summary.
    #[serde(default = "default_summary_window")]
    pub summary_window: usize,
    /// Characters kept per section in the rolling summary.
    #[serde(default = "default_summary_chars")]
    pub summary_chars: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Work types (lowercase substrings) that end with a reference list.
    #[serde(default = "default_reference_work_types")]
    pub reference_work_types: Vec<String>,
}

fn default_pages() -> u32 {
    10
}

fn default_tolerance() -> f32 {
    0.15
}

fn default_max_expansion_rounds() -> u32 {
    5
}

fn default_sections_per_round() -> usize {
    3
}

fn default_summary_window() -> usize {
    3
}

fn default_summary_chars() -> usize {
    200
}

fn default_temperature() -> f32 {
    0.7
}

fn default_reference_work_types() -> Vec<String> {
    ["coursework", "diploma", "thesis", "referat", "report", "курсов", "диплом", "реферат"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_pages: default_pages(),
            tolerance: default_tolerance(),
            max_expansion_rounds: default_max_expansion_rounds(),
            sections_per_round: default_sections_per_round(),
            summary_window: default_summary_window(),
            summary_chars: default_summary_chars(),
            temperature: default_temperature(),
            reference_work_types: default_reference_work_types(),
        }
    }
}

impl GenerationConfig {
    pub fn needs_references(&self, work_type: &str) -> bool {
        let work_type = work_type.to_lowercase();
        self.reference_work_types
            .iter()
            .any(|t| work_type.contains(t.as_str()))
    }
}
