// src/config.rs
//! Environment-derived configuration, resolved once at startup and passed
//! explicitly into every component (no ambient globals, so tests can inject
//! their own values).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default scoring rubric sent alongside every batch. Override with `PREF_PROMPT`.
pub const DEFAULT_RUBRIC: &str = "\
Score the article's significance to me on the scale 0.0-10.0. The goal is to find news that would be considered important for me based either on global scale criteria or local keywords, so I either have to hear about them or want to hear about them.
Articles rated below 3 usually cover sports, entertainment, and small local news. Articles with rating 5+ cover significant world events that shape the world.

Use the next global scale criteria to determine if I have to hear about the article:
1. **Scale:** how broadly the event affects humanity;
2. **Impact:** how strong the immediate effect is;
3. **Novelty:** how unique and unexpected is the event;
4. **Potential:** how likely it is to shape the future;
5. **Legacy:** how likely it is to be considered a turning point in history or a major milestone;
6. **Positivity:** how positive is the event;
7. **Credibility:** how trustworthy and reliable is the source.";

#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Base URL of the feed service (Google Reader compatible API).
    pub feed_base_url: String,
    /// Base URL of the OpenAI-compatible scoring service.
    pub scoring_base_url: String,
    /// Label whose items await triage, e.g. "significance_todo".
    pub stream_label: String,
    /// Score at or above which an item is tagged high significance.
    pub high_border: f64,
    /// Score at or above which an item is tagged medium significance.
    pub medium_border: f64,
    /// Page size requested from the feed service.
    pub max_fetch: u32,
    /// Chunk size for scoring requests and tag edits.
    pub batch_size: usize,
    /// Model identifier for the scoring service.
    pub model: String,
    /// Where the latest refresh token is persisted across restarts. A
    /// relative path is anchored to the working directory at startup, so a
    /// later chdir cannot move the file.
    pub refresh_token_file: PathBuf,
    pub poll_every_hours: f64,
    /// Scoring rubric text sent with every batch.
    pub rubric: String,
    pub client_id: String,
    pub client_secret: String,
    /// Environment-supplied refresh token; fallback when the token file is absent.
    pub refresh_token_env: Option<String>,
    pub scoring_api_key: String,
    /// Optional app identification headers for the feed service.
    pub app_id: Option<String>,
    pub app_key: Option<String>,
}

impl TriageConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            feed_base_url: env_or("INOREADER_BASE_URL", "https://www.inoreader.com"),
            scoring_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com"),
            stream_label: env_or("STREAM_LABEL", "significance_todo"),
            high_border: env_parse("HIGH_BORDER", 6.5)?,
            medium_border: env_parse("MEDIUM_BORDER", 5.0)?,
            max_fetch: env_parse("MAX_FETCH", 100)?,
            batch_size: env_parse("BATCH_SIZE", 50)?,
            model: env_or("OPENAI_MODEL", "gpt-5-nano"),
            refresh_token_file: resolve_token_path(&env_or(
                "REFRESH_TOKEN_FILE",
                "last_refresh_token.txt",
            )),
            poll_every_hours: env_parse("POLL_EVERY_HOURS", 4.0)?,
            rubric: env_or("PREF_PROMPT", DEFAULT_RUBRIC).trim().to_string(),
            client_id: env_required("INOREADER_CLIENT_ID")?,
            client_secret: env_required("INOREADER_CLIENT_SECRET")?,
            refresh_token_env: env_optional("INOREADER_REFRESH_TOKEN"),
            scoring_api_key: env_required("OPENAI_API_KEY")?,
            app_id: env_optional("INOREADER_APP_ID"),
            app_key: env_optional("INOREADER_APP_KEY"),
        })
    }

    /// Stream identifier of the triage label, e.g. `user/-/label/significance_todo`.
    pub fn stream_id(&self) -> String {
        format!("user/-/label/{}", self.stream_label)
    }

    /// Sleep between cycles. Floored at 36 seconds so a zero/negative setting
    /// cannot produce a busy loop.
    pub fn poll_interval(&self) -> Duration {
        let hours = self.poll_every_hours.max(0.01);
        Duration::from_secs((hours * 3600.0) as u64)
    }
}

/// Anchor a relative token-file path to the startup working directory.
fn resolve_token_path(raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(dir) => dir.join(path),
        Err(_) => path,
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_required(key: &str) -> Result<String> {
    env_optional(key).with_context(|| format!("missing required environment variable {key}"))
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_optional(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
