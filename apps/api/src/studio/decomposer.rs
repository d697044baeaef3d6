//! Block Decomposer: flattens a `SectionModel` into ordered editable blocks.
//!
//! Blocks are emitted in canonical section order, jobs in document order and
//! bullets in job order, so reassembly can rebuild the same structure.

use crate::models::block::{Block, BlockId, BlockKind};
use crate::models::section::{SectionKey, SectionModel};

/// Lines that open a new section when the header has to be recovered from raw text.
const HEADER_STOP_KEYWORDS: &[&str] = &[
    "summary",
    "experience",
    "education",
    "skills",
    "objective",
    "profile",
];

const MAX_HEADER_LINES: usize = 10;

/// Headings are short; longer lines mentioning a keyword are prose.
const MAX_HEADING_WORDS: usize = 4;

/// Hands out block ids for one decomposition pass.
struct IdCounter(u32);

impl IdCounter {
    fn next(&mut self) -> BlockId {
        let id = BlockId(self.0);
        self.0 += 1;
        id
    }
}

/// Decomposes a parsed resume into blocks. Ids start at 0 on every call.
pub fn decompose(model: &SectionModel) -> Vec<Block> {
    let mut ids = IdCounter(0);
    let mut blocks = Vec::new();

    for key in SectionKey::ALL {
        match key {
            SectionKey::Header => {
                if let Some(header) = header_text(model) {
                    blocks.push(Block::new(ids.next(), key, BlockKind::Text, header));
                }
            }
            SectionKey::Summary => {
                let summary = model
                    .summary
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                if !summary.is_empty() {
                    blocks.push(Block::new(ids.next(), key, BlockKind::Summary, summary));
                }
            }
            SectionKey::Experience => {
                for (job_index, job) in model.experience.iter().enumerate() {
                    for bullet in job.bullets.iter().filter(|b| !b.trim().is_empty()) {
                        blocks.push(
                            Block::new(ids.next(), key, BlockKind::Bullet, bullet.clone())
                                .with_job(job_index, &job.title),
                        );
                    }
                }
            }
            _ => {
                let kind = if key == SectionKey::Skills {
                    BlockKind::Skill
                } else {
                    BlockKind::Text
                };
                for entry in model.entries(key).iter().filter(|e| !e.trim().is_empty()) {
                    blocks.push(Block::new(ids.next(), key, kind, entry.clone()));
                }
            }
        }
    }

    blocks
}

/// Header lines joined with newlines, or a best-effort recovery from raw text.
fn header_text(model: &SectionModel) -> Option<String> {
    let lines: Vec<&str> = model
        .header
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();

    if !lines.is_empty() {
        return Some(lines.join("\n"));
    }

    derive_header(&model.raw_text)
}

/// Takes leading non-blank lines of the raw document until a section heading
/// shows up or `MAX_HEADER_LINES` are collected.
pub fn derive_header(raw_text: &str) -> Option<String> {
    let lines: Vec<&str> = raw_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take_while(|l| !is_section_heading(l))
        .take(MAX_HEADER_LINES)
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn is_section_heading(line: &str) -> bool {
    if line.split_whitespace().count() > MAX_HEADING_WORDS {
        return false;
    }
    let lower = line.to_lowercase();
    HEADER_STOP_KEYWORDS.iter().any(|kw| lower.contains(kw))
}
