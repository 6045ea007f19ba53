//! Document assembly: turning a generated [`Document`] into a file on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use crate::generation::Document;
use crate::retry::{Classify, FailureClass};

/// Hex digits of the content hash used as the artifact file name.
const NAME_DIGITS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document '{0}' has no content")]
    Empty(String),
}

impl Classify for AssemblyError {
    fn failure_class(&self) -> FailureClass {
        FailureClass::Permanent
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory assembled documents are written to.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
}

fn default_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self { dir: default_dir() }
    }
}

/// Renders a document into a deliverable artifact.
///
/// Implementations must be deterministic: the same document always yields the
/// same path and bytes.
#[async_trait]
pub trait DocumentAssembler: Send + Sync {
    fn name(&self) -> &str;

    async fn assemble(&self, document: &Document) -> Result<PathBuf, AssemblyError>;
}

/// Writes documents as Markdown files named by content hash.
pub struct MarkdownAssembler {
    dir: PathBuf,
}

impl MarkdownAssembler {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &ArtifactsConfig) -> Self {
        Self::new(config.dir.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DocumentAssembler for MarkdownAssembler {
    fn name(&self) -> &str {
        "markdown"
    }

    async fn assemble(&self, document: &Document) -> Result<PathBuf, AssemblyError> {
        if document.word_count() == 0 {
            return Err(AssemblyError::Empty(document.title.clone()));
        }

        let rendered = render_markdown(document);
        let digest = format!("{:x}", Sha256::digest(rendered.as_bytes()));
        let path = self.dir.join(format!("{}.md", &digest[..NAME_DIGITS]));

        fs::create_dir_all(&self.dir).await?;
        fs::write(&path, rendered.as_bytes()).await?;

        debug!(
            path = %path.display(),
            bytes = rendered.len(),
            sections = document.sections.len(),
            "Document assembled"
        );
        Ok(path)
    }
}

/// Title as a top-level heading, each section one level below its nesting.
pub fn render_markdown(document: &Document) -> String {
    let mut out = format!("# {}\n", document.title.trim());

    for section in &document.sections {
        if section.body.trim().is_empty() {
            continue;
        }
        let depth = (section.level as usize + 1).clamp(2, 6);
        out.push('\n');
        out.push_str(&"#".repeat(depth));
        out.push(' ');
        out.push_str(section.heading.trim());
        out.push_str("\n\n");
        out.push_str(section.body.trim());
        out.push('\n');
    }
    out
}
