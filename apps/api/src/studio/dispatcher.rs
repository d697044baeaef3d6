//! Batch Enhancement Dispatcher: one backend call per batch, many blocks per call.
//!
//! Flow: select blocks → build `[BLOCK n]` prompt → single `enhance_resume` call →
//!       parse reply into per-position segments → apply by selection index.
//!
//! Mapping is positional: marker `[BLOCK n]` feeds the n-th selected block.
//! It is a best-effort contract with free-form LLM output, not a guarantee;
//! a model that renumbers or merges blocks will misplace text. Positions the
//! reply does not cover are left untouched so `re-enhance` can pick them up.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend_client::strip_json_fences;
use crate::models::block::{Block, BlockId, BlockStatus};
use crate::studio::prompts::build_batch_prompt;
use crate::studio::review::ReviewBoard;

static BLOCK_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[BLOCK\s+(\d+)\]").expect("valid block marker regex"));

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n[ \t]*\r?\n").expect("valid paragraph regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Please provide a job description")]
    MissingJobDescription,

    #[error("Please provide an API key")]
    MissingCredential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    EnhanceAll,
    ReEnhance,
}

/// A prepared batch: which blocks go out, in which order, and the prompt carrying them.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub kind: BatchKind,
    pub selection: Vec<BlockId>,
    pub prompt: String,
    /// The selected blocks as they were when the prompt was built, by position.
    pub snapshot: Vec<Block>,
}

/// What a batch changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub requested: usize,
    pub applied: usize,
    /// Selected blocks the reply produced nothing for. Eligible for re-enhance.
    pub missing: Vec<BlockId>,
    /// Accepted blocks that were part of the selection and left as they were.
    pub kept_accepted: usize,
    /// Blocks the user edited or reviewed while the batch was out.
    pub kept_reviewed: usize,
}

/// Checks the inputs every batch needs before any network call is made.
pub fn validate_inputs(job_description: &str, api_key: &str) -> Result<(), DispatchError> {
    if job_description.trim().is_empty() {
        return Err(DispatchError::MissingJobDescription);
    }
    if api_key.trim().is_empty() {
        return Err(DispatchError::MissingCredential);
    }
    Ok(())
}

/// Every block outside the locked sections.
pub fn select_for_enhance_all(board: &ReviewBoard) -> Vec<BlockId> {
    board.enhanceable().map(|b| b.id).collect()
}

/// Rejected blocks, plus blocks still waiting for a suggestion a previous batch
/// failed to deliver. Accepted blocks are never re-sent.
pub fn select_for_re_enhance(board: &ReviewBoard) -> Vec<BlockId> {
    board
        .enhanceable()
        .filter(|b| match b.status {
            BlockStatus::Rejected => true,
            BlockStatus::Original | BlockStatus::Enhanced => !b.has_suggestion(),
            BlockStatus::Accepted => false,
        })
        .map(|b| b.id)
        .collect()
}

/// Builds the batch for `kind`. Returns `None` when nothing is eligible.
pub fn prepare_batch(
    board: &ReviewBoard,
    kind: BatchKind,
    job_description: &str,
) -> Option<BatchRequest> {
    let selection = match kind {
        BatchKind::EnhanceAll => select_for_enhance_all(board),
        BatchKind::ReEnhance => select_for_re_enhance(board),
    };

    if selection.is_empty() {
        return None;
    }

    let snapshot: Vec<Block> = selection
        .iter()
        .filter_map(|id| board.get(*id))
        .cloned()
        .collect();
    let texts: Vec<&str> = snapshot.iter().map(|b| b.text.as_str()).collect();

    let prompt = build_batch_prompt(&texts, job_description);
    debug!(
        "Prepared {:?} batch: {} blocks, {} prompt chars",
        kind,
        selection.len(),
        prompt.len()
    );

    Some(BatchRequest {
        kind,
        selection,
        prompt,
        snapshot,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Reply parsing
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StructuredReply {
    List(Vec<String>),
    Indexed { blocks: Vec<IndexedBlock> },
}

#[derive(Debug, Deserialize)]
struct IndexedBlock {
    index: usize,
    text: String,
}

/// Parses a batch reply into exactly `expected` positions.
///
/// Tried in order: a structured JSON reply, `[BLOCK n]` markers, and finally
/// blank-line separated paragraphs. Empty or uncovered positions are `None`.
pub fn parse_batch_reply(reply: &str, expected: usize) -> Vec<Option<String>> {
    if let Some(segments) = parse_structured(reply, expected) {
        return segments;
    }
    if let Some(segments) = parse_markers(reply, expected) {
        return segments;
    }
    parse_paragraphs(reply, expected)
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn parse_structured(reply: &str, expected: usize) -> Option<Vec<Option<String>>> {
    let reply: StructuredReply = serde_json::from_str(strip_json_fences(reply)).ok()?;
    let mut segments = vec![None; expected];

    match reply {
        StructuredReply::List(items) => {
            for (slot, item) in segments.iter_mut().zip(items) {
                *slot = non_empty(&item);
            }
        }
        StructuredReply::Indexed { blocks } => {
            for block in blocks {
                if let Some(slot) = block.index.checked_sub(1).and_then(|i| segments.get_mut(i)) {
                    if slot.is_none() {
                        *slot = non_empty(&block.text);
                    }
                }
            }
        }
    }

    Some(segments)
}

fn parse_markers(reply: &str, expected: usize) -> Option<Vec<Option<String>>> {
    let markers: Vec<(usize, usize, usize)> = BLOCK_MARKER
        .captures_iter(reply)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?.as_str().parse::<usize>().ok()?;
            Some((number, whole.start(), whole.end()))
        })
        .collect();

    if markers.is_empty() {
        return None;
    }

    let bodies: Vec<(usize, Option<String>)> = markers
        .iter()
        .enumerate()
        .map(|(i, &(number, _, body_start))| {
            let body_end = markers
                .get(i + 1)
                .map(|&(_, next_start, _)| next_start)
                .unwrap_or(reply.len());
            (number, non_empty(&reply[body_start..body_end]))
        })
        .collect();

    let in_range = bodies
        .iter()
        .any(|(number, _)| (1..=expected).contains(number));

    let mut segments = vec![None; expected];
    if in_range {
        for (number, body) in bodies {
            if let Some(slot) = number.checked_sub(1).and_then(|i| segments.get_mut(i)) {
                if slot.is_none() {
                    *slot = body;
                }
            }
        }
    } else {
        // Numbering the model invented (e.g. starting at 0): fall back to marker order.
        warn!("Batch reply markers are out of range; mapping in marker order");
        for (slot, (_, body)) in segments.iter_mut().zip(bodies) {
            *slot = body;
        }
    }

    Some(segments)
}

fn parse_paragraphs(reply: &str, expected: usize) -> Vec<Option<String>> {
    let mut segments: Vec<Option<String>> = PARAGRAPH_BREAK
        .split(reply)
        .map(str::trim)
        .filter(|p| !p.is_empty() && !p.starts_with("[BLOCK"))
        .take(expected)
        .map(|p| Some(p.to_string()))
        .collect();
    segments.resize(expected, None);
    segments
}

// ────────────────────────────────────────────────────────────────────────────
// Application
// ────────────────────────────────────────────────────────────────────────────

/// Applies parsed segments to the selected blocks by position.
///
/// A block receiving text becomes `enhanced`. A block with no segment is left
/// exactly as it was. Accepted blocks are never touched.
pub fn apply_batch(
    board: &mut ReviewBoard,
    selection: &[BlockId],
    segments: &[Option<String>],
) -> BatchReport {
    apply_batch_guarded(board, selection, segments, &[])
}

/// Like [`apply_batch`], but a block that no longer matches its entry in
/// `snapshot` was changed while the batch was out and is left alone.
/// Positions past the end of `snapshot` are unguarded.
pub fn apply_batch_guarded(
    board: &mut ReviewBoard,
    selection: &[BlockId],
    segments: &[Option<String>],
    snapshot: &[Block],
) -> BatchReport {
    let mut report = BatchReport {
        requested: selection.len(),
        ..Default::default()
    };

    for (position, id) in selection.iter().enumerate() {
        let Some(block) = board.get_mut(*id) else {
            continue;
        };

        if block.status == BlockStatus::Accepted {
            report.kept_accepted += 1;
            continue;
        }

        if snapshot.get(position).is_some_and(|before| before != &*block) {
            debug!("Block {:?} changed during the batch; keeping the user's version", id);
            report.kept_reviewed += 1;
            continue;
        }

        match segments.get(position).and_then(|s| s.as_deref()) {
            Some(text) => {
                block.enhanced_text = text.to_string();
                block.status = BlockStatus::Enhanced;
                report.applied += 1;
            }
            None => report.missing.push(*id),
        }
    }

    if !report.missing.is_empty() {
        warn!(
            "Batch reply covered {}/{} blocks; {} left for re-enhance",
            report.applied,
            report.requested,
            report.missing.len()
        );
    }

    report
}
