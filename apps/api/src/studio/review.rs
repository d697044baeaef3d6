//! Review State Machine: the single authoritative container for a document's blocks.
//!
//! ```text
//!   original ──enhance──▶ enhanced ──accept──▶ accepted
//!                           │  ▲                 │
//!                        reject│ reopen/edit      reject
//!                           ▼  │                 ▼
//!                          rejected ◀────────────┘
//! ```
//!
//! Invariant: a block is only ever `accepted` while it carries a non-empty suggestion.
//! Blocks in locked sections never enter the accept/reject cycle; they are edited in place.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::models::block::{Block, BlockId, BlockStatus};
use crate::models::section::SectionKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    #[error("Block {0} not found")]
    BlockNotFound(BlockId),

    #[error("Block {0} has no suggestion to accept")]
    NoSuggestion(BlockId),

    #[error("Block {0} belongs to a section that is edited directly and cannot be reviewed")]
    LockedSection(BlockId),

    #[error("Block {id} cannot be {action} while {status:?}")]
    InvalidTransition {
        id: BlockId,
        action: &'static str,
        status: BlockStatus,
    },

    #[error("Edited text cannot be empty")]
    EmptyEdit,
}

/// Which sections are excluded from AI enhancement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancePolicy {
    locked: BTreeSet<SectionKey>,
}

impl EnhancePolicy {
    pub fn new(locked: impl IntoIterator<Item = SectionKey>) -> Self {
        Self {
            locked: locked.into_iter().collect(),
        }
    }

    pub fn is_locked(&self, section: SectionKey) -> bool {
        self.locked.contains(&section)
    }

    pub fn locked_sections(&self) -> impl Iterator<Item = SectionKey> + '_ {
        self.locked.iter().copied()
    }
}

impl Default for EnhancePolicy {
    fn default() -> Self {
        Self::new([
            SectionKey::Header,
            SectionKey::Education,
            SectionKey::Certifications,
        ])
    }
}

/// Review progress counters shown alongside the block list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReviewSummary {
    pub total: usize,
    pub enhanceable: usize,
    pub enhanced: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub pending: usize,
}

/// What an edit changed, so callers can report it accurately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOutcome {
    /// The suggestion was replaced and awaits a decision.
    SuggestionUpdated,
    /// A locked block's own text was replaced.
    TextUpdated,
}

#[derive(Debug, Clone, Default)]
pub struct ReviewBoard {
    blocks: Vec<Block>,
    policy: EnhancePolicy,
}

impl ReviewBoard {
    pub fn new(blocks: Vec<Block>, policy: EnhancePolicy) -> Self {
        Self { blocks, policy }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn is_enhanceable(&self, block: &Block) -> bool {
        !self.policy.is_locked(block.section)
    }

    pub fn enhanceable(&self) -> impl Iterator<Item = &Block> + '_ {
        self.blocks.iter().filter(move |b| self.is_enhanceable(b))
    }

    /// Mutable access for the batch dispatcher, which owns the `enhanced` transition.
    pub(crate) fn get_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    /// Looks up a block that takes part in the accept/reject cycle.
    fn reviewable_mut(&mut self, id: BlockId) -> Result<&mut Block, ReviewError> {
        let locked = match self.get(id) {
            None => return Err(ReviewError::BlockNotFound(id)),
            Some(block) => self.policy.is_locked(block.section),
        };
        if locked {
            return Err(ReviewError::LockedSection(id));
        }
        self.get_mut(id).ok_or(ReviewError::BlockNotFound(id))
    }

    pub fn accept(&mut self, id: BlockId) -> Result<(), ReviewError> {
        let block = self.reviewable_mut(id)?;
        if !block.has_suggestion() {
            return Err(ReviewError::NoSuggestion(id));
        }
        block.status = BlockStatus::Accepted;
        Ok(())
    }

    /// The suggestion is kept on rejection; reassembly falls back to the original text.
    pub fn reject(&mut self, id: BlockId) -> Result<(), ReviewError> {
        let block = self.reviewable_mut(id)?;
        match block.status {
            BlockStatus::Enhanced | BlockStatus::Accepted | BlockStatus::Rejected => {
                block.status = BlockStatus::Rejected;
                Ok(())
            }
            BlockStatus::Original => Err(ReviewError::InvalidTransition {
                id,
                action: "rejected",
                status: block.status,
            }),
        }
    }

    /// Replaces the suggestion (reviewable blocks) or the text itself (locked blocks).
    /// An edited suggestion always returns to `enhanced`; editing never accepts.
    pub fn edit(&mut self, id: BlockId, new_text: &str) -> Result<EditOutcome, ReviewError> {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return Err(ReviewError::EmptyEdit);
        }

        let locked = self
            .get(id)
            .map(|b| self.policy.is_locked(b.section))
            .ok_or(ReviewError::BlockNotFound(id))?;

        let block = self.get_mut(id).ok_or(ReviewError::BlockNotFound(id))?;

        if locked {
            block.text = new_text.to_string();
            return Ok(EditOutcome::TextUpdated);
        }

        if block.status == BlockStatus::Original {
            return Err(ReviewError::InvalidTransition {
                id,
                action: "edited",
                status: block.status,
            });
        }

        block.enhanced_text = new_text.to_string();
        block.status = BlockStatus::Enhanced;
        Ok(EditOutcome::SuggestionUpdated)
    }

    /// Reopens a decided block. Without a suggestion there is nothing to decide on,
    /// so the block goes back to `original`.
    pub fn reopen(&mut self, id: BlockId) -> Result<(), ReviewError> {
        let block = self.reviewable_mut(id)?;
        match block.status {
            BlockStatus::Accepted | BlockStatus::Rejected => {
                block.status = if block.has_suggestion() {
                    BlockStatus::Enhanced
                } else {
                    BlockStatus::Original
                };
                Ok(())
            }
            status => Err(ReviewError::InvalidTransition {
                id,
                action: "reopened",
                status,
            }),
        }
    }

    /// Accepts every reviewable block that carries a suggestion. Returns how many changed.
    pub fn accept_all(&mut self) -> usize {
        let policy = &self.policy;
        let mut changed = 0;
        for block in self.blocks.iter_mut() {
            if policy.is_locked(block.section) || !block.has_suggestion() {
                continue;
            }
            if block.status != BlockStatus::Accepted {
                block.status = BlockStatus::Accepted;
                changed += 1;
            }
        }
        changed
    }

    /// Rejects every reviewable block regardless of enhancement state.
    pub fn reject_all(&mut self) -> usize {
        let policy = &self.policy;
        let mut changed = 0;
        for block in self.blocks.iter_mut() {
            if policy.is_locked(block.section) {
                continue;
            }
            if block.status != BlockStatus::Rejected {
                block.status = BlockStatus::Rejected;
                changed += 1;
            }
        }
        changed
    }

    pub fn summary(&self) -> ReviewSummary {
        let mut summary = ReviewSummary {
            total: self.blocks.len(),
            ..Default::default()
        };

        for block in self.enhanceable() {
            summary.enhanceable += 1;
            if block.has_suggestion() {
                summary.enhanced += 1;
            }
            match block.status {
                BlockStatus::Accepted => summary.accepted += 1,
                BlockStatus::Rejected => summary.rejected += 1,
                BlockStatus::Original | BlockStatus::Enhanced => summary.pending += 1,
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::block::BlockKind;

    fn block(id: u32, section: SectionKey, text: &str) -> Block {
        Block::new(BlockId(id), section, BlockKind::Text, text.to_string())
    }

    fn enhanced(id: u32, text: &str, suggestion: &str) -> Block {
        let mut b = block(id, SectionKey::Skills, text);
        b.enhanced_text = suggestion.to_string();
        b.status = BlockStatus::Enhanced;
        b
    }

    fn board(blocks: Vec<Block>) -> ReviewBoard {
        ReviewBoard::new(blocks, EnhancePolicy::default())
    }

    #[test]
    fn test_accept_enhanced_block() {
        let mut board = board(vec![enhanced(0, "Rust", "Rust, Tokio")]);
        board.accept(BlockId(0)).unwrap();
        assert_eq!(board.get(BlockId(0)).unwrap().status, BlockStatus::Accepted);
    }

    #[test]
    fn test_accept_without_suggestion_is_refused() {
        let mut board = board(vec![block(0, SectionKey::Skills, "Rust")]);
        assert_eq!(
            board.accept(BlockId(0)),
            Err(ReviewError::NoSuggestion(BlockId(0)))
        );
        assert_eq!(board.get(BlockId(0)).unwrap().status, BlockStatus::Original);
    }

    #[test]
    fn test_accept_unknown_block() {
        let mut board = board(vec![]);
        assert_eq!(
            board.accept(BlockId(9)),
            Err(ReviewError::BlockNotFound(BlockId(9)))
        );
    }

    #[test]
    fn test_locked_block_cannot_be_accepted_or_rejected() {
        let mut locked = block(0, SectionKey::Education, "BSc CS");
        locked.enhanced_text = "BSc Computer Science".to_string();
        let mut board = board(vec![locked]);

        assert_eq!(
            board.accept(BlockId(0)),
            Err(ReviewError::LockedSection(BlockId(0)))
        );
        assert_eq!(
            board.reject(BlockId(0)),
            Err(ReviewError::LockedSection(BlockId(0)))
        );
    }

    #[test]
    fn test_reject_keeps_suggestion() {
        let mut board = board(vec![enhanced(0, "Rust", "Rust, Tokio")]);
        board.accept(BlockId(0)).unwrap();
        board.reject(BlockId(0)).unwrap();

        let b = board.get(BlockId(0)).unwrap();
        assert_eq!(b.status, BlockStatus::Rejected);
        assert_eq!(b.enhanced_text, "Rust, Tokio");
        assert_eq!(b.effective_text(), "Rust");
    }

    #[test]
    fn test_reject_original_is_invalid() {
        let mut board = board(vec![block(0, SectionKey::Skills, "Rust")]);
        assert!(matches!(
            board.reject(BlockId(0)),
            Err(ReviewError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_edit_returns_to_enhanced_and_never_accepts() {
        let mut board = board(vec![enhanced(0, "Rust", "Rust, Tokio")]);
        board.accept(BlockId(0)).unwrap();

        let outcome = board.edit(BlockId(0), "  Rust, Tokio, Axum  ").unwrap();
        assert_eq!(outcome, EditOutcome::SuggestionUpdated);

        let b = board.get(BlockId(0)).unwrap();
        assert_eq!(b.status, BlockStatus::Enhanced);
        assert_eq!(b.enhanced_text, "Rust, Tokio, Axum");
        assert_eq!(b.text, "Rust");
    }

    #[test]
    fn test_edit_from_rejected_reopens_with_new_suggestion() {
        let mut board = board(vec![enhanced(0, "Rust", "Rust, Tokio")]);
        board.reject(BlockId(0)).unwrap();
        board.edit(BlockId(0), "Rust (5 years)").unwrap();
        assert_eq!(board.get(BlockId(0)).unwrap().status, BlockStatus::Enhanced);
    }

    #[test]
    fn test_edit_rejects_blank_text() {
        let mut board = board(vec![enhanced(0, "Rust", "Rust, Tokio")]);
        assert_eq!(board.edit(BlockId(0), "   "), Err(ReviewError::EmptyEdit));
        assert_eq!(board.get(BlockId(0)).unwrap().enhanced_text, "Rust, Tokio");
    }

    #[test]
    fn test_edit_original_reviewable_block_is_invalid() {
        let mut board = board(vec![block(0, SectionKey::Skills, "Rust")]);
        assert!(matches!(
            board.edit(BlockId(0), "Rust, Go"),
            Err(ReviewError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_edit_locked_block_replaces_text_in_place() {
        let mut board = board(vec![block(0, SectionKey::Header, "Jane Doe")]);
        let outcome = board.edit(BlockId(0), "Jane Q. Doe\njane@example.com").unwrap();
        assert_eq!(outcome, EditOutcome::TextUpdated);

        let b = board.get(BlockId(0)).unwrap();
        assert_eq!(b.text, "Jane Q. Doe\njane@example.com");
        assert_eq!(b.status, BlockStatus::Original);
        assert_eq!(b.effective_text(), "Jane Q. Doe\njane@example.com");
    }

    #[test]
    fn test_reopen_restores_pending_decision() {
        let mut board = board(vec![enhanced(0, "Rust", "Rust, Tokio")]);
        board.accept(BlockId(0)).unwrap();
        board.reopen(BlockId(0)).unwrap();

        let b = board.get(BlockId(0)).unwrap();
        assert_eq!(b.status, BlockStatus::Enhanced);
        assert_eq!(b.enhanced_text, "Rust, Tokio");
    }

    #[test]
    fn test_reopen_without_suggestion_goes_back_to_original() {
        let mut board = board(vec![block(0, SectionKey::Skills, "Rust")]);
        board.reject_all();
        board.reopen(BlockId(0)).unwrap();
        assert_eq!(board.get(BlockId(0)).unwrap().status, BlockStatus::Original);
    }

    #[test]
    fn test_reopen_pending_block_is_invalid() {
        let mut board = board(vec![enhanced(0, "Rust", "Rust, Tokio")]);
        assert!(matches!(
            board.reopen(BlockId(0)),
            Err(ReviewError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_accept_all_only_touches_blocks_with_suggestions() {
        let mut board = board(vec![
            enhanced(0, "A", "A+"),
            enhanced(1, "B", "B+"),
            enhanced(2, "C", "C+"),
            block(3, SectionKey::Skills, "D"),
        ]);

        assert_eq!(board.accept_all(), 3);
        let statuses: Vec<BlockStatus> = board.blocks().iter().map(|b| b.status).collect();
        assert_eq!(
            statuses,
            vec![
                BlockStatus::Accepted,
                BlockStatus::Accepted,
                BlockStatus::Accepted,
                BlockStatus::Original,
            ]
        );
    }

    #[test]
    fn test_reject_all_skips_locked_sections() {
        let mut board = board(vec![
            enhanced(0, "A", "A+"),
            block(1, SectionKey::Skills, "B"),
            block(2, SectionKey::Header, "Jane Doe"),
        ]);

        assert_eq!(board.reject_all(), 2);
        assert_eq!(board.get(BlockId(0)).unwrap().status, BlockStatus::Rejected);
        assert_eq!(board.get(BlockId(1)).unwrap().status, BlockStatus::Rejected);
        assert_eq!(board.get(BlockId(2)).unwrap().status, BlockStatus::Original);
    }

    #[test]
    fn test_no_block_is_ever_accepted_without_suggestion() {
        let mut board = board(vec![
            enhanced(0, "A", "A+"),
            block(1, SectionKey::Skills, "B"),
            block(2, SectionKey::Projects, "C"),
        ]);
        board.accept_all();
        let _ = board.accept(BlockId(1));
        board.reject_all();
        let _ = board.reopen(BlockId(2));
        board.accept_all();

        assert!(board
            .blocks()
            .iter()
            .all(|b| b.status != BlockStatus::Accepted || b.has_suggestion()));
    }

    #[test]
    fn test_summary_counts_reviewable_blocks() {
        let mut board = board(vec![
            block(0, SectionKey::Header, "Jane Doe"),
            enhanced(1, "A", "A+"),
            enhanced(2, "B", "B+"),
            block(3, SectionKey::Skills, "C"),
            block(4, SectionKey::Education, "BSc"),
        ]);
        board.accept(BlockId(1)).unwrap();
        board.reject(BlockId(2)).unwrap();

        let summary = board.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.enhanceable, 3);
        assert_eq!(summary.enhanced, 2);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.pending, 1);
    }

    #[test]
    fn test_custom_policy_changes_enhanceable_set() {
        let board = ReviewBoard::new(
            vec![
                block(0, SectionKey::Header, "Jane"),
                block(1, SectionKey::Education, "BSc"),
            ],
            EnhancePolicy::new([SectionKey::Header]),
        );
        let ids: Vec<BlockId> = board.enhanceable().map(|b| b.id).collect();
        assert_eq!(ids, vec![BlockId(1)]);
    }
}
