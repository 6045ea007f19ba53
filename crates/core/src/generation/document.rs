//! Generated document model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    #[default]
    Body,
    /// Bibliography. Not counted towards the length target.
    References,
}

/// One section of a generated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    /// Nesting level, 1 for top-level sections.
    pub level: u8,
    pub body: String,
    /// Words the outline allotted to this section.
    #[serde(default)]
    pub target_words: u32,
    #[serde(default)]
    pub kind: SectionKind,
}

impl Section {
    pub fn new(heading: impl Into<String>, level: u8, target_words: u32) -> Self {
        Self {
            heading: heading.into(),
            level: level.max(1),
            body: String::new(),
            target_words,
            kind: SectionKind::Body,
        }
    }

    pub fn word_count(&self) -> u32 {
        word_count(&self.body)
    }

    /// Words still missing to reach this section's own target.
    pub fn deficit(&self) -> i64 {
        self.target_words as i64 - self.word_count() as i64
    }
}

/// An ordered sequence of sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub sections: Vec<Section>,
}

impl Document {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            sections: Vec::new(),
        }
    }

    /// Words across all sections, references included.
    pub fn word_count(&self) -> u32 {
        self.sections.iter().map(Section::word_count).sum()
    }

    /// Words in body sections, the figure the length target applies to.
    pub fn body_word_count(&self) -> u32 {
        self.sections
            .iter()
            .filter(|s| s.kind == SectionKind::Body)
            .map(Section::word_count)
            .sum()
    }

    /// Section bodies joined by blank lines, without headings.
    pub fn plain_text(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.body.trim())
            .filter(|b| !b.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Half-open word ranges of each section within [`Document::plain_text`].
    pub fn section_word_ranges(&self) -> Vec<(usize, std::ops::Range<usize>)> {
        let mut start = 0usize;
        let mut ranges = Vec::with_capacity(self.sections.len());
        for (idx, section) in self.sections.iter().enumerate() {
            let words = section.word_count() as usize;
            ranges.push((idx, start..start + words));
            start += words;
        }
        ranges
    }
}

pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// Strip markdown decoration and a repeated heading from model output.
pub fn clean_section_text(heading: &str, text: &str) -> String {
    let mut lines: Vec<&str> = text.trim().lines().collect();

    if let Some(first) = lines.first() {
        let first = normalize_heading(first);
        let heading = normalize_heading(heading);
        if !first.is_empty()
            && !heading.is_empty()
            && (first == heading || first.starts_with(&heading) || heading.starts_with(&first))
        {
            lines.remove(0);
        }
    }

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in lines {
        let line = strip_markdown(line);
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs.join("\n\n")
}

fn normalize_heading(line: &str) -> String {
    strip_markdown(line)
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c.is_whitespace())
        .trim_end_matches(|c: char| c == ':' || c == '.')
        .to_lowercase()
}

fn strip_markdown(line: &str) -> String {
    let line = line.trim();
    let line = line.trim_start_matches('#').trim_start_matches('>').trim();
    let line = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line);
    line.replace("**", "").replace("__", "").replace('`', "")
}

/// Keep at most `max_words` words of `text`, ending on a sentence boundary
/// if that loses no more than a tenth of the kept words.
pub fn truncate_words(text: &str, max_words: u32) -> String {
    if word_count(text) <= max_words {
        return text.to_string();
    }
    let mut end = 0;
    for (seen, (idx, word)) in word_spans(text).enumerate() {
        if seen as u32 == max_words {
            break;
        }
        end = idx + word.len();
    }
    let kept = &text[..end];
    match kept.rfind(['.', '!', '?']) {
        Some(pos) if word_count(&kept[..=pos]) * 10 >= max_words * 9 => kept[..=pos].to_string(),
        _ => kept.to_string(),
    }
}

fn word_spans(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split_whitespace()
        .map(move |w| (w.as_ptr() as usize - text.as_ptr() as usize, w))
}
