//! Axum route handlers for the Studio API.
//!
//! Session mutexes are held only for the synchronous `begin_*` / `finish_*`
//! steps; every backend call runs with no lock held.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::backend_client::providers::{provider_catalog, ProviderInfo};
use crate::backend_client::{LlmCredentials, Provider};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::block::{Block, BlockId};
use crate::studio::dispatcher::{BatchKind, BatchReport};
use crate::studio::review::{EditOutcome, ReviewSummary};
use crate::studio::scoring::{compare_scores, ScoreComparison};
use crate::studio::session::{BatchOutcome, Session, SessionView, VersionSnapshot};
use crate::state::AppState;

/// Document types the extraction backend can read.
const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "doc"];

pub const FINAL_FILE_NAME: &str = "enhanced_resume_final.txt";

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub job_description: String,
}

#[derive(Debug, Deserialize)]
pub struct JobDescriptionRequest {
    pub job_description: String,
}

/// Provider routing for a batch. Every field falls back to server config.
#[derive(Debug, Default, Deserialize)]
pub struct EnhanceRequest {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnhanceResponse {
    pub message: String,
    pub report: Option<BatchReport>,
    pub session: SessionView,
}

#[derive(Debug, Deserialize)]
pub struct EditBlockRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct BlockResponse {
    pub block: Block,
    pub summary: ReviewSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit: Option<EditOutcome>,
}

#[derive(Debug, Serialize)]
pub struct BulkReviewResponse {
    pub changed: usize,
    pub summary: ReviewSummary,
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

async fn find_session(state: &AppState, id: Uuid) -> Result<Arc<Mutex<Session>>, AppError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))
}

/// Resolves provider, model and key from the request, falling back to config.
/// A missing key is left empty and rejected by batch validation.
pub fn resolve_credentials(
    config: &Config,
    request: EnhanceRequest,
) -> Result<LlmCredentials, AppError> {
    let provider = match request.provider.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => p
            .parse::<Provider>()
            .map_err(|e| AppError::Validation(e.to_string()))?,
        _ => config.default_provider,
    };

    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .or_else(|| {
            config
                .default_model
                .clone()
                .filter(|_| provider == config.default_provider)
        })
        .unwrap_or_else(|| provider.default_model().to_string());

    let api_key = request
        .api_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| config.llm_api_key.clone())
        .unwrap_or_default();

    Ok(LlmCredentials {
        provider,
        model,
        api_key,
    })
}

fn file_extension(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/providers
pub async fn handle_list_providers() -> Json<Vec<ProviderInfo>> {
    Json(provider_catalog())
}

/// POST /api/v1/sessions
pub async fn handle_create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let session = Session::new(state.enhance_policy(), request.job_description);
    let handle = state.sessions.insert(session).await;

    let view = handle.lock().await.view();
    info!(
        "Created session {} ({} active)",
        view.id,
        state.sessions.len().await
    );
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/v1/sessions/:id
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = find_session(&state, id).await?;
    let view = session.lock().await.view();
    Ok(Json(view))
}

/// DELETE /api/v1/sessions/:id
pub async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !state.sessions.remove(id).await {
        return Err(AppError::NotFound(format!("Session {id} not found")));
    }
    info!(
        "Deleted session {id} ({} active)",
        state.sessions.len().await
    );
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/sessions/:id/job-description
pub async fn handle_set_job_description(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<JobDescriptionRequest>,
) -> Result<Json<SessionView>, AppError> {
    let session = find_session(&state, id).await?;
    let mut session = session.lock().await;
    session.set_job_description(request.job_description);
    Ok(Json(session.view()))
}

/// POST /api/v1/sessions/:id/document
///
/// Multipart upload with a `file` field. Extraction runs on the backend; the
/// extracted sections replace whatever document the session held.
pub async fn handle_upload_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<SessionView>, AppError> {
    let session = find_session(&state, id).await?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("resume").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read upload: {e}")))?;
        upload = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) =
        upload.ok_or_else(|| AppError::Validation("Missing 'file' field".to_string()))?;

    match file_extension(&file_name) {
        Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) => {}
        _ => {
            return Err(AppError::Validation(
                "Unsupported file type. Please upload PDF or Word document".to_string(),
            ))
        }
    }
    if bytes.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".to_string()));
    }

    let document = state.backend.extract_document(&file_name, bytes).await?;
    let (model, stats) = document.into_parts();

    let mut session = session.lock().await;
    session.load_document(file_name, &model, stats);
    Ok(Json(session.view()))
}

/// DELETE /api/v1/sessions/:id/document
pub async fn handle_reset_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = find_session(&state, id).await?;
    let mut session = session.lock().await;
    session.reset();
    Ok(Json(session.view()))
}

/// POST /api/v1/sessions/:id/enhance
pub async fn handle_enhance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<EnhanceRequest>>,
) -> Result<Json<EnhanceResponse>, AppError> {
    run_batch(&state, id, BatchKind::EnhanceAll, body).await
}

/// POST /api/v1/sessions/:id/re-enhance
///
/// Re-sends rejected blocks and blocks a previous batch left without a suggestion.
pub async fn handle_re_enhance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<EnhanceRequest>>,
) -> Result<Json<EnhanceResponse>, AppError> {
    run_batch(&state, id, BatchKind::ReEnhance, body).await
}

async fn run_batch(
    state: &AppState,
    id: Uuid,
    kind: BatchKind,
    body: Option<Json<EnhanceRequest>>,
) -> Result<Json<EnhanceResponse>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let credentials = resolve_credentials(&state.config, request)?;
    let handle = find_session(state, id).await?;

    let ticket = handle.lock().await.begin_batch(kind, &credentials)?;
    let Some(ticket) = ticket else {
        let message = match kind {
            BatchKind::EnhanceAll => "No blocks available to enhance",
            BatchKind::ReEnhance => "No rejected or unresolved blocks to re-enhance",
        };
        let view = handle.lock().await.view();
        return Ok(Json(EnhanceResponse {
            message: message.to_string(),
            report: None,
            session: view,
        }));
    };

    // The call and its bookkeeping run on their own task: if the client goes
    // away and this future is dropped, the batch still finishes and the
    // in-flight marker is still cleared.
    let backend = state.backend.clone();
    let task = tokio::spawn(async move {
        let reply = backend
            .enhance_resume(&ticket.request.prompt, &ticket.job_description, &credentials)
            .await;
        let mut session = handle.lock().await;
        let outcome = session.finish_batch(&ticket, reply);
        let view = session.view();
        (outcome, view)
    });

    let (outcome, view) = task
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Enhancement task failed: {e}")))?;
    let outcome = outcome?;

    let (message, report) = match outcome {
        BatchOutcome::Applied(report) => {
            let mut message = if report.missing.is_empty() {
                format!("Enhanced {} blocks", report.applied)
            } else {
                format!(
                    "Enhanced {} of {} blocks; {} can be retried with re-enhance",
                    report.applied,
                    report.requested,
                    report.missing.len()
                )
            };
            if report.kept_reviewed > 0 {
                message.push_str(&format!(
                    "; kept {} blocks you changed while enhancing",
                    report.kept_reviewed
                ));
            }
            (message, Some(report))
        }
        BatchOutcome::Stale => (
            "The document changed while enhancing; the result was discarded".to_string(),
            None,
        ),
    };

    Ok(Json(EnhanceResponse {
        message,
        report,
        session: view,
    }))
}

async fn block_action(
    state: &AppState,
    id: Uuid,
    block_id: u32,
    action: impl FnOnce(&mut Session, BlockId) -> Result<Option<EditOutcome>, AppError>,
) -> Result<Json<BlockResponse>, AppError> {
    let session = find_session(state, id).await?;
    let mut session = session.lock().await;
    let block_id = BlockId(block_id);

    let edit = action(&mut *session, block_id)?;
    let block = session
        .board()
        .get(block_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Block {block_id} not found")))?;

    Ok(Json(BlockResponse {
        block,
        summary: session.board().summary(),
        edit,
    }))
}

/// POST /api/v1/sessions/:id/blocks/:block_id/accept
pub async fn handle_accept_block(
    State(state): State<AppState>,
    Path((id, block_id)): Path<(Uuid, u32)>,
) -> Result<Json<BlockResponse>, AppError> {
    block_action(&state, id, block_id, |s, b| Ok(s.accept(b).map(|_| None)?)).await
}

/// POST /api/v1/sessions/:id/blocks/:block_id/reject
pub async fn handle_reject_block(
    State(state): State<AppState>,
    Path((id, block_id)): Path<(Uuid, u32)>,
) -> Result<Json<BlockResponse>, AppError> {
    block_action(&state, id, block_id, |s, b| Ok(s.reject(b).map(|_| None)?)).await
}

/// POST /api/v1/sessions/:id/blocks/:block_id/reopen
pub async fn handle_reopen_block(
    State(state): State<AppState>,
    Path((id, block_id)): Path<(Uuid, u32)>,
) -> Result<Json<BlockResponse>, AppError> {
    block_action(&state, id, block_id, |s, b| Ok(s.reopen(b).map(|_| None)?)).await
}

/// PUT /api/v1/sessions/:id/blocks/:block_id
///
/// Replaces the suggestion, or the text itself for blocks in locked sections.
pub async fn handle_edit_block(
    State(state): State<AppState>,
    Path((id, block_id)): Path<(Uuid, u32)>,
    Json(request): Json<EditBlockRequest>,
) -> Result<Json<BlockResponse>, AppError> {
    block_action(&state, id, block_id, |s, b| {
        Ok(Some(s.edit(b, &request.text)?))
    })
    .await
}

/// POST /api/v1/sessions/:id/blocks/accept-all
pub async fn handle_accept_all(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BulkReviewResponse>, AppError> {
    let session = find_session(&state, id).await?;
    let mut session = session.lock().await;
    let changed = session.accept_all();
    Ok(Json(BulkReviewResponse {
        changed,
        summary: session.board().summary(),
    }))
}

/// POST /api/v1/sessions/:id/blocks/reject-all
pub async fn handle_reject_all(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BulkReviewResponse>, AppError> {
    let session = find_session(&state, id).await?;
    let mut session = session.lock().await;
    let changed = session.reject_all();
    Ok(Json(BulkReviewResponse {
        changed,
        summary: session.board().summary(),
    }))
}

/// POST /api/v1/sessions/:id/scores
///
/// Scores the original and the current document against the job description.
pub async fn handle_compute_scores(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScoreComparison>, AppError> {
    let handle = find_session(&state, id).await?;
    let ticket = handle.lock().await.begin_scoring()?;

    let comparison = compare_scores(
        state.backend.as_ref(),
        &ticket.inputs,
        &ticket.job_description,
        ticket.revision,
    )
    .await?;

    if !handle.lock().await.finish_scoring(ticket, comparison.clone()) {
        return Err(AppError::Conflict(
            "The document changed while scoring. Please score again".to_string(),
        ));
    }

    Ok(Json(comparison))
}

/// GET /api/v1/sessions/:id/history
pub async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<VersionSnapshot>>, AppError> {
    let session = find_session(&state, id).await?;
    let history = session.lock().await.history().to_vec();
    Ok(Json(history))
}

/// GET /api/v1/sessions/:id/final
///
/// Plain-text download of the reassembled document.
pub async fn handle_download_final(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = find_session(&state, id).await?;
    let document = session.lock().await.final_document()?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{FINAL_FILE_NAME}\""),
            ),
        ],
        document,
    ))
}
