//! Score Comparator: ATS score of the original document against the current one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::backend_client::{AtsScore, BackendError, ResumeBackend};
use crate::models::block::Block;
use crate::studio::reassembler::{render, TextChoice};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreComparison {
    pub original: AtsScore,
    pub current: AtsScore,
    /// `current.score - original.score`.
    pub delta: f64,
    /// Board revision the current document was rendered from.
    pub revision: u64,
    pub computed_at: DateTime<Utc>,
}

/// Both documents rendered from one board snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreInputs {
    pub original: String,
    pub current: String,
}

impl ScoreInputs {
    pub fn from_blocks(blocks: &[Block]) -> Self {
        Self {
            original: render(blocks, TextChoice::Original),
            current: render(blocks, TextChoice::Effective),
        }
    }
}

/// Scores both documents concurrently. Either failure fails the comparison,
/// so a half-updated pair is never returned.
pub async fn compare_scores(
    backend: &dyn ResumeBackend,
    inputs: &ScoreInputs,
    job_description: &str,
    revision: u64,
) -> Result<ScoreComparison, BackendError> {
    let (original, current) = tokio::try_join!(
        backend.calculate_score(&inputs.original, job_description),
        backend.calculate_score(&inputs.current, job_description),
    )?;

    let delta = current.score - original.score;
    info!(
        "ATS score {:.1} -> {:.1} (delta {:+.1}, revision {revision})",
        original.score, current.score, delta
    );

    Ok(ScoreComparison {
        original,
        current,
        delta,
        revision,
        computed_at: Utc::now(),
    })
}
