//! Document Reassembler: renders blocks back into a plain-text resume.

use crate::models::block::Block;
use crate::models::section::SectionKey;

/// Leading characters that already read as a bullet.
const BULLET_GLYPHS: &[char] = &['•', '-', '*', '●', '○', '»', '→', '▪'];

const BULLET_PREFIX: &str = "• ";

/// Which text of each block to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextChoice {
    /// Accepted suggestions, falling back to the block text.
    Effective,
    /// The block text, ignoring suggestions.
    Original,
}

/// The document the user downloads: accepted suggestions, everything else as is.
pub fn build_final(blocks: &[Block]) -> String {
    render(blocks, TextChoice::Effective)
}

/// Renders blocks in canonical section order. Sections without blocks are
/// skipped, the header has no title line, and sections are separated by a
/// blank line.
pub fn render(blocks: &[Block], choice: TextChoice) -> String {
    let pick = |b: &Block| -> String {
        match choice {
            TextChoice::Effective => b.effective_text().to_string(),
            TextChoice::Original => b.text.clone(),
        }
    };

    let mut sections: Vec<String> = Vec::new();

    for key in SectionKey::ALL {
        let members: Vec<&Block> = blocks.iter().filter(|b| b.section == key).collect();
        if members.is_empty() {
            continue;
        }

        let mut lines: Vec<String> = Vec::new();
        if let Some(title) = key.title() {
            lines.push(title.to_string());
        }

        match key {
            SectionKey::Experience => {
                for (title, bullets) in group_by_job(&members) {
                    if !title.is_empty() {
                        lines.push(title.to_string());
                    }
                    lines.extend(bullets.into_iter().map(|b| bulleted(&pick(b))));
                }
            }
            SectionKey::Skills => {
                lines.extend(members.iter().map(|b| bulleted(&pick(b))));
            }
            _ => {
                lines.extend(members.iter().map(|b| pick(b)));
            }
        }

        sections.push(lines.join("\n"));
    }

    sections.join("\n\n")
}

/// Groups experience bullets by job index, jobs in first-seen order.
fn group_by_job<'a>(members: &[&'a Block]) -> Vec<(&'a str, Vec<&'a Block>)> {
    let mut groups: Vec<(Option<usize>, &'a str, Vec<&'a Block>)> = Vec::new();

    for &block in members {
        let title = block.job_title.as_deref().unwrap_or("");
        match groups.iter_mut().find(|(idx, _, _)| *idx == block.job_index) {
            Some((_, _, bullets)) => bullets.push(block),
            None => groups.push((block.job_index, title, vec![block])),
        }
    }

    groups
        .into_iter()
        .map(|(_, title, bullets)| (title, bullets))
        .collect()
}

fn bulleted(text: &str) -> String {
    if text.trim_start().starts_with(BULLET_GLYPHS) {
        text.to_string()
    } else {
        format!("{BULLET_PREFIX}{text}")
    }
}
