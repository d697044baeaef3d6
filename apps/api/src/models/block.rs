use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::section::SectionKey;

/// Stable block identifier, assigned in decomposition order starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    #[default]
    Original,
    Enhanced,
    Accepted,
    Rejected,
}

/// Rendering category. Has no effect on review transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Summary,
    Skill,
    Bullet,
    Text,
}

/// One atomic editable unit of resume content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub section: SectionKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    pub text: String,
    pub enhanced_text: String,
    pub status: BlockStatus,
    pub kind: BlockKind,
}

impl Block {
    pub fn new(id: BlockId, section: SectionKey, kind: BlockKind, text: String) -> Self {
        Self {
            id,
            section,
            job_index: None,
            job_title: None,
            text,
            enhanced_text: String::new(),
            status: BlockStatus::Original,
            kind,
        }
    }

    pub fn with_job(mut self, index: usize, title: &str) -> Self {
        self.job_index = Some(index);
        self.job_title = Some(title.to_string());
        self
    }

    /// Derived from `enhanced_text`; `status` remains the only stored state.
    pub fn has_suggestion(&self) -> bool {
        !self.enhanced_text.trim().is_empty()
    }

    /// Text that goes into the final document.
    pub fn effective_text(&self) -> &str {
        if self.status == BlockStatus::Accepted && self.has_suggestion() {
            &self.enhanced_text
        } else {
            &self.text
        }
    }
}
