//! Review sessions: one document, its board, and the bookkeeping that keeps
//! late backend replies from landing on the wrong document.
//!
//! A session is only ever mutated under its own mutex, and no backend call is
//! made while that mutex is held. Work that needs the backend is split into a
//! `begin_*` step that snapshots what the call needs and a `finish_*` step that
//! applies the result if the session still holds the same document.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend_client::{BackendError, DocumentStats, LlmCredentials};
use crate::models::block::{Block, BlockId};
use crate::models::section::{SectionKey, SectionModel};
use crate::studio::decomposer::decompose;
use crate::studio::dispatcher::{
    apply_batch_guarded, parse_batch_reply, prepare_batch, validate_inputs, BatchKind, BatchReport,
    BatchRequest, DispatchError,
};
use crate::studio::reassembler::build_final;
use crate::studio::review::{EditOutcome, EnhancePolicy, ReviewBoard, ReviewError, ReviewSummary};
use crate::studio::scoring::{ScoreComparison, ScoreInputs};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No document loaded. Upload a resume first")]
    NoDocument,

    #[error("Please provide a job description")]
    MissingJobDescription,

    #[error("An enhancement batch is already running for this session")]
    BatchInFlight,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Review(#[from] ReviewError),
}

/// Snapshot handed out by `begin_batch`; everything the backend call needs.
#[derive(Debug, Clone)]
pub struct BatchTicket {
    pub generation: u64,
    pub request: BatchRequest,
    pub job_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Applied(BatchReport),
    /// The document changed while the call was out; the reply was dropped.
    Stale,
}

#[derive(Debug, Clone)]
pub struct ScoreTicket {
    pub generation: u64,
    pub revision: u64,
    pub inputs: ScoreInputs,
    pub job_description: String,
}

/// One scored version of the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionSnapshot {
    pub version: u32,
    pub document: String,
    pub ats_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Serialized form of a session returned by the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub document_name: Option<String>,
    pub stats: Option<DocumentStats>,
    pub job_description: String,
    pub locked_sections: Vec<SectionKey>,
    pub enhancing: bool,
    pub generation: u64,
    pub revision: u64,
    pub summary: ReviewSummary,
    pub blocks: Vec<Block>,
    pub scores: Option<ScoreComparison>,
}

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    policy: EnhancePolicy,
    board: ReviewBoard,
    job_description: String,
    document_name: Option<String>,
    stats: Option<DocumentStats>,
    /// Bumped whenever the document is replaced or cleared.
    generation: u64,
    /// Generation of the batch currently out at the backend.
    in_flight: Option<u64>,
    /// Bumped on every block mutation.
    revision: u64,
    scores: Option<ScoreComparison>,
    history: Vec<VersionSnapshot>,
}

impl Session {
    pub fn new(policy: EnhancePolicy, job_description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            board: ReviewBoard::new(Vec::new(), policy.clone()),
            policy,
            job_description: job_description.into(),
            document_name: None,
            stats: None,
            generation: 0,
            in_flight: None,
            revision: 0,
            scores: None,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn board(&self) -> &ReviewBoard {
        &self.board
    }

    pub fn job_description(&self) -> &str {
        &self.job_description
    }

    pub fn history(&self) -> &[VersionSnapshot] {
        &self.history
    }

    pub fn is_enhancing(&self) -> bool {
        self.in_flight.is_some()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn mutated(&mut self) {
        self.revision += 1;
        self.touch();
    }

    /// Scores computed against another job description no longer apply.
    pub fn set_job_description(&mut self, job_description: impl Into<String>) {
        self.job_description = job_description.into();
        self.scores = None;
        self.touch();
    }

    /// Replaces the board with a fresh decomposition of `model`.
    pub fn load_document(&mut self, name: impl Into<String>, model: &SectionModel, stats: DocumentStats) {
        self.generation += 1;
        self.board = ReviewBoard::new(decompose(model), self.policy.clone());
        self.document_name = Some(name.into());
        self.stats = Some(stats);
        self.in_flight = None;
        self.scores = None;
        self.mutated();

        info!(
            "Session {} loaded {:?}: {} blocks (generation {})",
            self.id,
            self.document_name,
            self.board.blocks().len(),
            self.generation
        );
    }

    /// Drops the document, its blocks and scores. The job description stays.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.board = ReviewBoard::new(Vec::new(), self.policy.clone());
        self.document_name = None;
        self.stats = None;
        self.in_flight = None;
        self.scores = None;
        self.history.clear();
        self.mutated();
        info!("Session {} reset (generation {})", self.id, self.generation);
    }

    // ── Batches ────────────────────────────────────────────────────────────

    /// Validates inputs and marks a batch in flight. `Ok(None)` means no block
    /// is eligible and nothing was sent.
    pub fn begin_batch(
        &mut self,
        kind: BatchKind,
        credentials: &LlmCredentials,
    ) -> Result<Option<BatchTicket>, SessionError> {
        validate_inputs(&self.job_description, &credentials.api_key)?;
        if self.board.is_empty() {
            return Err(SessionError::NoDocument);
        }
        if self.in_flight.is_some() {
            return Err(SessionError::BatchInFlight);
        }

        let Some(request) = prepare_batch(&self.board, kind, &self.job_description) else {
            return Ok(None);
        };

        self.in_flight = Some(self.generation);
        info!(
            "Session {}: {:?} batch of {} blocks via {} ({})",
            self.id,
            kind,
            request.selection.len(),
            credentials.provider,
            credentials.model
        );

        Ok(Some(BatchTicket {
            generation: self.generation,
            request,
            job_description: self.job_description.clone(),
        }))
    }

    /// Applies a batch reply. A failed call leaves every block as it was.
    pub fn finish_batch(
        &mut self,
        ticket: &BatchTicket,
        reply: Result<String, BackendError>,
    ) -> Result<BatchOutcome, BackendError> {
        if self.in_flight == Some(ticket.generation) {
            self.in_flight = None;
        }

        if ticket.generation != self.generation {
            warn!(
                "Session {}: discarding {:?} reply for generation {} (now {})",
                self.id, ticket.request.kind, ticket.generation, self.generation
            );
            return Ok(BatchOutcome::Stale);
        }

        let reply = reply?;
        let selection = &ticket.request.selection;
        let segments = parse_batch_reply(&reply, selection.len());
        let report = apply_batch_guarded(
            &mut self.board,
            selection,
            &segments,
            &ticket.request.snapshot,
        );
        if report.applied > 0 {
            self.mutated();
        }

        Ok(BatchOutcome::Applied(report))
    }

    // ── Review ─────────────────────────────────────────────────────────────

    pub fn accept(&mut self, id: BlockId) -> Result<(), SessionError> {
        self.board.accept(id)?;
        self.mutated();
        Ok(())
    }

    pub fn reject(&mut self, id: BlockId) -> Result<(), SessionError> {
        self.board.reject(id)?;
        self.mutated();
        Ok(())
    }

    pub fn reopen(&mut self, id: BlockId) -> Result<(), SessionError> {
        self.board.reopen(id)?;
        self.mutated();
        Ok(())
    }

    pub fn edit(&mut self, id: BlockId, text: &str) -> Result<EditOutcome, SessionError> {
        let outcome = self.board.edit(id, text)?;
        self.mutated();
        Ok(outcome)
    }

    pub fn accept_all(&mut self) -> usize {
        let count = self.board.accept_all();
        if count > 0 {
            self.mutated();
        }
        count
    }

    pub fn reject_all(&mut self) -> usize {
        let count = self.board.reject_all();
        if count > 0 {
            self.mutated();
        }
        count
    }

    // ── Scores ─────────────────────────────────────────────────────────────

    pub fn begin_scoring(&self) -> Result<ScoreTicket, SessionError> {
        if self.job_description.trim().is_empty() {
            return Err(SessionError::MissingJobDescription);
        }
        if self.board.is_empty() {
            return Err(SessionError::NoDocument);
        }

        Ok(ScoreTicket {
            generation: self.generation,
            revision: self.revision,
            inputs: ScoreInputs::from_blocks(self.board.blocks()),
            job_description: self.job_description.clone(),
        })
    }

    /// Stores the comparison and records a history entry. Returns `false` when
    /// the document or the job description changed while scoring.
    pub fn finish_scoring(&mut self, ticket: ScoreTicket, comparison: ScoreComparison) -> bool {
        if ticket.generation != self.generation {
            warn!(
                "Session {}: discarding scores for generation {} (now {})",
                self.id, ticket.generation, self.generation
            );
            return false;
        }
        if ticket.job_description != self.job_description {
            warn!(
                "Session {}: discarding scores computed against a previous job description",
                self.id
            );
            return false;
        }

        self.history.push(VersionSnapshot {
            version: self.history.len() as u32 + 1,
            document: ticket.inputs.current,
            ats_score: comparison.current.score,
            timestamp: comparison.computed_at,
        });
        self.scores = Some(comparison);
        self.touch();
        true
    }

    pub fn final_document(&self) -> Result<String, SessionError> {
        if self.board.is_empty() {
            return Err(SessionError::NoDocument);
        }
        Ok(build_final(self.board.blocks()))
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            document_name: self.document_name.clone(),
            stats: self.stats,
            job_description: self.job_description.clone(),
            locked_sections: self.policy.locked_sections().collect(),
            enhancing: self.is_enhancing(),
            generation: self.generation,
            revision: self.revision,
            summary: self.board.summary(),
            blocks: self.board.blocks().to_vec(),
            scores: self.scores.clone(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Store
// ────────────────────────────────────────────────────────────────────────────

/// In-memory session registry shared across handlers.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>>,
}

impl SessionStore {
    pub async fn insert(&self, session: Session) -> Arc<Mutex<Session>> {
        let id = session.id();
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, handle.clone());
        handle
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops sessions untouched for longer than `max_idle`. Sessions that are
    /// locked or have a batch out are kept until a later sweep.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(session) => session.is_enhancing() || session.updated_at >= cutoff,
            Err(_) => true,
        });

        before - sessions.len()
    }
}

/// Runs `evict_idle` every `period` until the returned task is aborted.
pub fn spawn_idle_sweeper(
    store: SessionStore,
    max_idle: Duration,
    period: StdDuration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        loop {
            timer.tick().await;
            let evicted = store.evict_idle(max_idle).await;
            if evicted > 0 {
                info!(
                    "Evicted {evicted} idle sessions ({} active)",
                    store.len().await
                );
            }
        }
    })
}
