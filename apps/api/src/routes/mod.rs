pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};

use crate::state::AppState;
use crate::studio::handlers;

/// Resume uploads are forwarded whole to the extraction backend.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/providers", get(handlers::handle_list_providers))
        // Sessions
        .route("/api/v1/sessions", post(handlers::handle_create_session))
        .route(
            "/api/v1/sessions/:id",
            get(handlers::handle_get_session).delete(handlers::handle_delete_session),
        )
        .route(
            "/api/v1/sessions/:id/job-description",
            put(handlers::handle_set_job_description),
        )
        .route(
            "/api/v1/sessions/:id/document",
            post(handlers::handle_upload_document).delete(handlers::handle_reset_document),
        )
        // Enhancement
        .route("/api/v1/sessions/:id/enhance", post(handlers::handle_enhance))
        .route(
            "/api/v1/sessions/:id/re-enhance",
            post(handlers::handle_re_enhance),
        )
        // Review
        .route(
            "/api/v1/sessions/:id/blocks/accept-all",
            post(handlers::handle_accept_all),
        )
        .route(
            "/api/v1/sessions/:id/blocks/reject-all",
            post(handlers::handle_reject_all),
        )
        .route(
            "/api/v1/sessions/:id/blocks/:block_id",
            put(handlers::handle_edit_block),
        )
        .route(
            "/api/v1/sessions/:id/blocks/:block_id/accept",
            post(handlers::handle_accept_block),
        )
        .route(
            "/api/v1/sessions/:id/blocks/:block_id/reject",
            post(handlers::handle_reject_block),
        )
        .route(
            "/api/v1/sessions/:id/blocks/:block_id/reopen",
            post(handlers::handle_reopen_block),
        )
        // Scores and output
        .route(
            "/api/v1/sessions/:id/scores",
            post(handlers::handle_compute_scores),
        )
        .route("/api/v1/sessions/:id/history", get(handlers::handle_history))
        .route(
            "/api/v1/sessions/:id/final",
            get(handlers::handle_download_final),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use bytes::Bytes;
    use serde_json::{json, Value};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use crate::backend_client::{
        AtsScore, BackendError, ExtractedDocument, LlmCredentials, Provider, ResumeBackend,
    };
    use crate::config::Config;
    use crate::models::section::SectionKey;
    use crate::studio::session::SessionStore;

    /// Canned backend: a fixed extracted document, keyword scoring, and a
    /// configurable enhancement reply that can be held until released.
    struct FakeBackend {
        reply: String,
        enhance_calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl FakeBackend {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                enhance_calls: AtomicUsize::new(0),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl ResumeBackend for FakeBackend {
        async fn extract_document(
            &self,
            _file_name: &str,
            _bytes: Bytes,
        ) -> Result<ExtractedDocument, BackendError> {
            Ok(serde_json::from_value(json!({
                "success": true,
                "text": "Jane Doe\nSKILLS\nGo\nEXPERIENCE\nEngineer\nBuilt X",
                "sections": {
                    "header": {"lines": ["Jane Doe"]},
                    "skills": {"blocks": ["Go"]},
                    "experience": {"jobs": [{"title": "Engineer", "bullets": ["Built X"]}]}
                },
                "word_count": 7,
                "line_count": 6
            }))?)
        }

        async fn calculate_score(
            &self,
            resume: &str,
            _job_description: &str,
        ) -> Result<AtsScore, BackendError> {
            Ok(AtsScore {
                score: 10.0 * resume.matches("Rust").count() as f64,
                breakdown: Value::Null,
            })
        }

        async fn enhance_resume(
            &self,
            _prompt: &str,
            _job_description: &str,
            credentials: &LlmCredentials,
        ) -> Result<String, BackendError> {
            self.enhance_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if credentials.api_key == "bad-key" {
                return Err(BackendError::Rejected("Invalid API key".into()));
            }
            Ok(self.reply.clone())
        }
    }

    fn config(api_key: Option<&str>) -> Config {
        Config {
            backend_url: "http://backend.test/api".into(),
            backend_timeout_secs: 5,
            default_provider: Provider::Claude,
            default_model: None,
            llm_api_key: api_key.map(str::to_string),
            locked_sections: BTreeSet::from([SectionKey::Header]),
            session_idle_minutes: 120,
            port: 0,
            rust_log: "info".into(),
        }
    }

    fn app(backend: Arc<FakeBackend>, api_key: Option<&str>) -> Router {
        build_router(AppState {
            config: config(api_key),
            backend,
            sessions: SessionStore::default(),
        })
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn upload_request(uri: &str, file_name: &str) -> Request<Body> {
        let body = format!(
            "--XBOUNDARY\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             %PDF-1.4 fake\r\n\
             --XBOUNDARY--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                "multipart/form-data; boundary=XBOUNDARY",
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    /// Creates a session with a job description and an uploaded document.
    async fn loaded_session(app: &Router) -> String {
        let (status, body) = send(
            app,
            json_request(
                "POST",
                "/api/v1/sessions",
                json!({"job_description": "Senior Rust engineer"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            app,
            upload_request(&format!("/api/v1/sessions/{id}/document"), "cv.pdf"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["blocks"].as_array().unwrap().len(), 3);
        id
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(Arc::new(FakeBackend::replying("")), None);
        let (status, body) = send(&app, empty_request("GET", "/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_providers_are_listed() {
        let app = app(Arc::new(FakeBackend::replying("")), None);
        let (status, body) = send(&app, empty_request("GET", "/api/v1/providers")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);
        assert_eq!(body[1]["id"], "claude");
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let app = app(Arc::new(FakeBackend::replying("")), None);
        let uri = format!("/api/v1/sessions/{}", uuid::Uuid::new_v4());
        let (status, body) = send(&app, empty_request("GET", &uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unsupported_upload_is_rejected() {
        let app = app(Arc::new(FakeBackend::replying("")), None);
        let (_, body) = send(&app, json_request("POST", "/api/v1/sessions", json!({}))).await;
        let id = body["id"].as_str().unwrap();

        let (status, _) = send(
            &app,
            upload_request(&format!("/api/v1/sessions/{id}/document"), "notes.txt"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_enhance_without_credential_makes_no_call() {
        let backend = Arc::new(FakeBackend::replying("[BLOCK 1]\nRust"));
        let app = app(backend.clone(), None);
        let id = loaded_session(&app).await;

        let (status, body) = send(
            &app,
            json_request("POST", &format!("/api/v1/sessions/{id}/enhance"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(backend.enhance_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_enhancement_is_bad_gateway_and_board_unchanged() {
        let backend = Arc::new(FakeBackend::replying("[BLOCK 1]\nRust"));
        let app = app(backend, None);
        let id = loaded_session(&app).await;

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/v1/sessions/{id}/enhance"),
                json!({"api_key": "bad-key"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["message"], "Invalid API key");

        let (_, session) = send(&app, empty_request("GET", &format!("/api/v1/sessions/{id}"))).await;
        assert_eq!(session["enhancing"], false);
        assert_eq!(session["summary"]["enhanced"], 0);
    }

    #[tokio::test]
    async fn test_enhance_review_and_download_flow() {
        // Two enhanceable blocks (skills, bullet); the reply only covers the first.
        let backend = Arc::new(FakeBackend::replying("[BLOCK 1]\nGo, Rust"));
        let app = app(backend, Some("sk-server"));
        let id = loaded_session(&app).await;

        let (status, body) = send(
            &app,
            empty_request("POST", &format!("/api/v1/sessions/{id}/enhance")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["applied"], 1);
        assert_eq!(body["report"]["missing"], json!([2]));

        let (status, body) = send(
            &app,
            empty_request("POST", &format!("/api/v1/sessions/{id}/blocks/1/accept")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["block"]["status"], "accepted");
        assert_eq!(body["summary"]["accepted"], 1);

        // Block 2 never received a suggestion.
        let (status, _) = send(
            &app,
            empty_request("POST", &format!("/api/v1/sessions/{id}/blocks/2/accept")),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = send(
            &app,
            empty_request("POST", &format!("/api/v1/sessions/{id}/scores")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["original"]["score"], 0.0);
        assert_eq!(body["current"]["score"], 10.0);

        let (_, history) = send(
            &app,
            empty_request("GET", &format!("/api/v1/sessions/{id}/history")),
        )
        .await;
        assert_eq!(history.as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(empty_request("GET", &format!("/api/v1/sessions/{id}/final")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"enhanced_resume_final.txt\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(
            text,
            "Jane Doe\n\nSKILLS\n• Go, Rust\n\nEXPERIENCE\nEngineer\n• Built X"
        );
    }

    #[tokio::test]
    async fn test_locked_block_edit_updates_text() {
        let app = app(Arc::new(FakeBackend::replying("")), None);
        let id = loaded_session(&app).await;

        let (status, body) = send(
            &app,
            json_request(
                "PUT",
                &format!("/api/v1/sessions/{id}/blocks/0"),
                json!({"text": "Jane Q. Doe"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edit"], "text_updated");
        assert_eq!(body["block"]["text"], "Jane Q. Doe");
    }

    #[tokio::test]
    async fn test_accept_all_on_board_without_suggestions_changes_nothing() {
        let app = app(Arc::new(FakeBackend::replying("")), None);
        let id = loaded_session(&app).await;

        let (status, body) = send(
            &app,
            empty_request("POST", &format!("/api/v1/sessions/{id}/blocks/accept-all")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], 0);
        assert_eq!(body["summary"]["accepted"], 0);
    }

    #[tokio::test]
    async fn test_overlapping_enhance_is_a_conflict() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(FakeBackend {
            reply: "[BLOCK 1]\nGo, Rust\n[BLOCK 2]\nBuilt X in Rust".into(),
            enhance_calls: AtomicUsize::new(0),
            gate: Some(gate.clone()),
        });
        let app = app(backend.clone(), Some("sk-server"));
        let id = loaded_session(&app).await;

        let uri = format!("/api/v1/sessions/{id}/enhance");
        let first = tokio::spawn(app.clone().oneshot(empty_request("POST", &uri)));

        while backend.enhance_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let (status, body) = send(&app, empty_request("POST", &uri)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFLICT");

        gate.notify_one();
        let response = first.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(backend.enhance_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_batch() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(FakeBackend {
            reply: "[BLOCK 1]\nGo, Rust\n[BLOCK 2]\nBuilt X in Rust".into(),
            enhance_calls: AtomicUsize::new(0),
            gate: Some(gate.clone()),
        });
        let app = app(backend.clone(), Some("sk-server"));
        let id = loaded_session(&app).await;

        let uri = format!("/api/v1/sessions/{id}/enhance");
        let first = tokio::spawn(app.clone().oneshot(empty_request("POST", &uri)));
        while backend.enhance_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let (status, _) = send(
            &app,
            empty_request("DELETE", &format!("/api/v1/sessions/{id}/document")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        gate.notify_one();
        let response = first.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["report"].is_null());
        assert!(body["session"]["blocks"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_enhance_request_still_finishes_batch() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(FakeBackend {
            reply: "[BLOCK 1]\nGo, Rust\n[BLOCK 2]\nBuilt X in Rust".into(),
            enhance_calls: AtomicUsize::new(0),
            gate: Some(gate.clone()),
        });
        let app = app(backend.clone(), Some("sk-server"));
        let id = loaded_session(&app).await;

        let uri = format!("/api/v1/sessions/{id}/enhance");
        let first = tokio::spawn(app.clone().oneshot(empty_request("POST", &uri)));
        while backend.enhance_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Client went away while the backend call was out.
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        gate.notify_one();

        let session_uri = format!("/api/v1/sessions/{id}");
        let mut enhancing = true;
        for _ in 0..1_000 {
            let (_, session) = send(&app, empty_request("GET", &session_uri)).await;
            enhancing = session["enhancing"].as_bool().unwrap();
            if !enhancing {
                assert_eq!(session["summary"]["enhanced"], 2);
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!enhancing);

        let retry = tokio::spawn(app.clone().oneshot(empty_request("POST", &uri)));
        while backend.enhance_calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        let response = retry.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_deleted_session_is_gone() {
        let app = app(Arc::new(FakeBackend::replying("")), None);
        let id = loaded_session(&app).await;
        let uri = format!("/api/v1/sessions/{id}");

        let response = app
            .clone()
            .oneshot(empty_request("DELETE", &uri))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let (status, _) = send(&app, empty_request("GET", &uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, empty_request("DELETE", &uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}
