use std::collections::BTreeSet;

use anyhow::{Context, Result};

use crate::backend_client::Provider;
use crate::models::section::SectionKey;

/// Sections excluded from AI enhancement unless `LOCKED_SECTIONS` overrides them.
const DEFAULT_LOCKED_SECTIONS: &str = "header,education,certifications";

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the extraction / scoring / enhancement backend, e.g. `http://localhost:8000/api`.
    pub backend_url: String,
    pub backend_timeout_secs: u64,
    pub default_provider: Provider,
    pub default_model: Option<String>,
    /// Server-side fallback credential. Requests may still carry their own key.
    pub llm_api_key: Option<String>,
    pub locked_sections: BTreeSet<SectionKey>,
    /// Sessions untouched for this long are evicted. `0` keeps them forever.
    pub session_idle_minutes: u64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let default_provider = std::env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "claude".to_string())
            .parse::<Provider>()
            .context("LLM_PROVIDER must be one of: openai, claude, openrouter")?;

        let locked_sections = parse_locked_sections(
            &std::env::var("LOCKED_SECTIONS").unwrap_or_else(|_| DEFAULT_LOCKED_SECTIONS.to_string()),
        )?;

        Ok(Config {
            backend_url: require_env("BACKEND_URL")?
                .trim_end_matches('/')
                .to_string(),
            backend_timeout_secs: std::env::var("BACKEND_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse::<u64>()
                .context("BACKEND_TIMEOUT_SECS must be a whole number of seconds")?,
            default_provider,
            default_model: optional_env("LLM_MODEL"),
            llm_api_key: optional_env("LLM_API_KEY"),
            locked_sections,
            session_idle_minutes: std::env::var("SESSION_IDLE_MINUTES")
                .unwrap_or_else(|_| "120".to_string())
                .parse::<u64>()
                .context("SESSION_IDLE_MINUTES must be a whole number of minutes")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parses a comma-separated list of section keys. Blank items are skipped.
pub fn parse_locked_sections(raw: &str) -> Result<BTreeSet<SectionKey>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SectionKey>()
                .with_context(|| format!("LOCKED_SECTIONS contains unknown section '{s}'"))
        })
        .collect()
}
