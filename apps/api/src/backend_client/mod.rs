/// Backend client: the single point of entry for calls to the resume backend.
///
/// ARCHITECTURAL RULE: document extraction, ATS scoring and LLM enhancement all
/// live behind the backend's HTTP API. No other module talks to it directly;
/// everything goes through `ResumeBackend`.
///
/// Calls are never retried here. A failed call is reported to the user, who
/// re-triggers the action.
use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::section::{SectionModel, WireSection};

pub mod providers;

pub use providers::Provider;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Backend rejected the request: {0}")]
    Rejected(String),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

/// Response of `POST /documents/extract`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedDocument {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sections: HashMap<String, WireSection>,
    #[serde(default)]
    pub word_count: u32,
    #[serde(default)]
    pub line_count: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub word_count: u32,
    pub line_count: u32,
}

impl ExtractedDocument {
    pub fn into_parts(self) -> (SectionModel, DocumentStats) {
        let stats = DocumentStats {
            word_count: self.word_count,
            line_count: self.line_count,
        };
        (SectionModel::from_wire(self.text, self.sections), stats)
    }
}

/// Response of `POST /scoring/calculate`. The breakdown is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtsScore {
    pub score: f64,
    #[serde(default)]
    pub breakdown: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    resume: &'a str,
    job_description: &'a str,
}

/// Provider routing and credential for a single enhancement call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmCredentials {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
}

#[derive(Debug, Serialize)]
struct EnhanceRequest<'a> {
    resume: &'a str,
    job_description: &'a str,
    provider: Provider,
    model: &'a str,
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct EnhanceResponse {
    #[serde(default)]
    success: bool,
    enhanced_resume: Option<String>,
    error: Option<String>,
}

/// FastAPI error body: `{"detail": "..."}`.
#[derive(Debug, Deserialize)]
struct BackendErrorBody {
    detail: serde_json::Value,
}

// ────────────────────────────────────────────────────────────────────────────
// Trait
// ────────────────────────────────────────────────────────────────────────────

/// The three collaborator operations consumed by the studio.
///
/// Carried in `AppState` as `Arc<dyn ResumeBackend>`; tests substitute a fake.
#[async_trait]
pub trait ResumeBackend: Send + Sync {
    async fn extract_document(
        &self,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<ExtractedDocument, BackendError>;

    async fn calculate_score(
        &self,
        resume: &str,
        job_description: &str,
    ) -> Result<AtsScore, BackendError>;

    /// Sends a fully built prompt as the `resume` field and returns the raw reply text.
    async fn enhance_resume(
        &self,
        prompt: &str,
        job_description: &str,
        credentials: &LlmCredentials,
    ) -> Result<String, BackendError>;
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP implementation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, BackendError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()?,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ResumeBackend for HttpBackend {
    async fn extract_document(
        &self,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<ExtractedDocument, BackendError> {
        let size = bytes.len();
        let part = multipart::Part::bytes(bytes.to_vec()).file_name(file_name.to_string());
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("/documents/extract"))
            .multipart(form)
            .send()
            .await?;

        let document: ExtractedDocument = check_status(response).await?.json().await?;
        if !document.success {
            return Err(BackendError::Rejected(
                document
                    .error
                    .unwrap_or_else(|| "document extraction failed".to_string()),
            ));
        }

        debug!(
            "Extracted {file_name} ({size} bytes): {} words, {} lines",
            document.word_count, document.line_count
        );
        Ok(document)
    }

    async fn calculate_score(
        &self,
        resume: &str,
        job_description: &str,
    ) -> Result<AtsScore, BackendError> {
        let response = self
            .client
            .post(self.url("/scoring/calculate"))
            .json(&ScoreRequest {
                resume,
                job_description,
            })
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    async fn enhance_resume(
        &self,
        prompt: &str,
        job_description: &str,
        credentials: &LlmCredentials,
    ) -> Result<String, BackendError> {
        let response = self
            .client
            .post(self.url("/enhance/"))
            .json(&EnhanceRequest {
                resume: prompt,
                job_description,
                provider: credentials.provider,
                model: &credentials.model,
                api_key: &credentials.api_key,
            })
            .send()
            .await?;

        let body: EnhanceResponse = check_status(response).await?.json().await?;
        if !body.success {
            return Err(BackendError::Rejected(
                body.error
                    .unwrap_or_else(|| "enhancement failed".to_string()),
            ));
        }

        let reply = body.enhanced_resume.unwrap_or_default();
        debug!(
            "Enhancement call succeeded: provider={}, model={}, reply_chars={}",
            credentials.provider,
            credentials.model,
            reply.len()
        );
        Ok(reply)
    }
}

/// Maps non-2xx responses to `BackendError::Api`, pulling out FastAPI's `detail` when present.
async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<BackendErrorBody>(body) {
        Ok(BackendErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(BackendErrorBody { detail }) => detail.to_string(),
        Err(_) => body.to_string(),
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
