//! Section Model: the typed, closed shape of a parsed resume.
//!
//! The extraction backend returns loosely structured section objects. They are
//! converted here, once, into `SectionModel` so everything downstream works
//! against fixed section identifiers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The fixed section identifiers, declared in canonical document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKey {
    Header,
    Summary,
    Skills,
    Experience,
    Education,
    Projects,
    Certifications,
    Awards,
    Publications,
    Volunteer,
    Languages,
    Interests,
}

impl SectionKey {
    /// Canonical order used by both decomposition and reassembly.
    pub const ALL: [SectionKey; 12] = [
        SectionKey::Header,
        SectionKey::Summary,
        SectionKey::Skills,
        SectionKey::Experience,
        SectionKey::Education,
        SectionKey::Projects,
        SectionKey::Certifications,
        SectionKey::Awards,
        SectionKey::Publications,
        SectionKey::Volunteer,
        SectionKey::Languages,
        SectionKey::Interests,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKey::Header => "header",
            SectionKey::Summary => "summary",
            SectionKey::Skills => "skills",
            SectionKey::Experience => "experience",
            SectionKey::Education => "education",
            SectionKey::Projects => "projects",
            SectionKey::Certifications => "certifications",
            SectionKey::Awards => "awards",
            SectionKey::Publications => "publications",
            SectionKey::Volunteer => "volunteer",
            SectionKey::Languages => "languages",
            SectionKey::Interests => "interests",
        }
    }

    /// Heading printed above the section in the final document. The header has none.
    pub fn title(self) -> Option<&'static str> {
        match self {
            SectionKey::Header => None,
            SectionKey::Summary => Some("SUMMARY"),
            SectionKey::Skills => Some("SKILLS"),
            SectionKey::Experience => Some("EXPERIENCE"),
            SectionKey::Education => Some("EDUCATION"),
            SectionKey::Projects => Some("PROJECTS"),
            SectionKey::Certifications => Some("CERTIFICATIONS"),
            SectionKey::Awards => Some("AWARDS & ACHIEVEMENTS"),
            SectionKey::Publications => Some("PUBLICATIONS"),
            SectionKey::Volunteer => Some("VOLUNTEER EXPERIENCE"),
            SectionKey::Languages => Some("LANGUAGES"),
            SectionKey::Interests => Some("INTERESTS"),
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSection(pub String);

impl fmt::Display for UnknownSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown section '{}'", self.0)
    }
}

impl std::error::Error for UnknownSection {}

impl FromStr for SectionKey {
    type Err = UnknownSection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        SectionKey::ALL
            .into_iter()
            .find(|key| key.as_str() == needle)
            .ok_or_else(|| UnknownSection(s.to_string()))
    }
}

/// A single job in the experience section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub title: String,
    #[serde(default)]
    pub bullets: Vec<String>,
}

/// Parsed resume structure. Absent sections are empty vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionModel {
    pub header: Vec<String>,
    pub summary: Vec<String>,
    pub skills: Vec<String>,
    pub experience: Vec<Job>,
    pub education: Vec<String>,
    pub projects: Vec<String>,
    pub certifications: Vec<String>,
    pub awards: Vec<String>,
    pub publications: Vec<String>,
    pub volunteer: Vec<String>,
    pub languages: Vec<String>,
    pub interests: Vec<String>,
    /// Full extracted text, used when the header was not segmented upstream.
    pub raw_text: String,
}

impl SectionModel {
    /// Ordered text entries of a non-experience section. Experience yields nothing here.
    pub fn entries(&self, key: SectionKey) -> &[String] {
        match key {
            SectionKey::Header => &self.header,
            SectionKey::Summary => &self.summary,
            SectionKey::Skills => &self.skills,
            SectionKey::Experience => &[],
            SectionKey::Education => &self.education,
            SectionKey::Projects => &self.projects,
            SectionKey::Certifications => &self.certifications,
            SectionKey::Awards => &self.awards,
            SectionKey::Publications => &self.publications,
            SectionKey::Volunteer => &self.volunteer,
            SectionKey::Languages => &self.languages,
            SectionKey::Interests => &self.interests,
        }
    }

    fn entries_mut(&mut self, key: SectionKey) -> Option<&mut Vec<String>> {
        match key {
            SectionKey::Header => Some(&mut self.header),
            SectionKey::Summary => Some(&mut self.summary),
            SectionKey::Skills => Some(&mut self.skills),
            SectionKey::Experience => None,
            SectionKey::Education => Some(&mut self.education),
            SectionKey::Projects => Some(&mut self.projects),
            SectionKey::Certifications => Some(&mut self.certifications),
            SectionKey::Awards => Some(&mut self.awards),
            SectionKey::Publications => Some(&mut self.publications),
            SectionKey::Volunteer => Some(&mut self.volunteer),
            SectionKey::Languages => Some(&mut self.languages),
            SectionKey::Interests => Some(&mut self.interests),
        }
    }

    /// Builds the typed model from the extraction backend's section map.
    /// Keys that are not known section identifiers (e.g. `other`) are dropped.
    pub fn from_wire(raw_text: String, sections: HashMap<String, WireSection>) -> Self {
        let mut model = SectionModel {
            raw_text,
            ..Default::default()
        };

        for (name, section) in sections {
            let Ok(key) = name.parse::<SectionKey>() else {
                continue;
            };
            if key == SectionKey::Experience {
                model.experience = section.jobs;
            } else if let Some(slot) = model.entries_mut(key) {
                *slot = section.into_entries();
            }
        }

        model
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire shapes returned by the extraction backend
// ────────────────────────────────────────────────────────────────────────────

/// A section object as the extractor sends it. Either `blocks` or `lines` may
/// carry the content; experience additionally carries `jobs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireSection {
    #[serde(default)]
    pub blocks: Vec<WireEntry>,
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireEntry {
    Plain(String),
    Block { text: String },
}

impl WireEntry {
    fn into_text(self) -> String {
        match self {
            WireEntry::Plain(text) | WireEntry::Block { text } => text,
        }
    }
}

impl WireSection {
    /// Prefers `blocks` and falls back to raw `lines`.
    fn into_entries(self) -> Vec<String> {
        if self.blocks.is_empty() {
            self.lines
        } else {
            self.blocks.into_iter().map(WireEntry::into_text).collect()
        }
    }
}
