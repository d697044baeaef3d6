use std::sync::Arc;

use crate::backend_client::ResumeBackend;
use crate::config::Config;
use crate::studio::review::EnhancePolicy;
use crate::studio::session::SessionStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Extraction, scoring and enhancement backend. Default: HttpBackend.
    pub backend: Arc<dyn ResumeBackend>,
    pub sessions: SessionStore,
}

impl AppState {
    /// Policy given to every new session, built from `LOCKED_SECTIONS`.
    pub fn enhance_policy(&self) -> EnhancePolicy {
        EnhancePolicy::new(self.config.locked_sections.iter().copied())
    }
}
