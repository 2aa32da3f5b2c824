// src/auth.rs
//! Credential manager: persists the long-lived refresh token to a plain-text
//! file and exchanges it for short-lived access tokens via the OAuth2
//! refresh-token grant. The file always reflects the last known good refresh
//! token; writes are best-effort and never abort a cycle.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Storage for the refresh token: file first, environment fallback.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    env_token: Option<String>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>, env_token: Option<String>) -> Self {
        Self {
            path: path.into(),
            env_token,
        }
    }

    /// Read the refresh token from disk, falling back to the injected
    /// environment value (persisting it on first use).
    pub fn load(&self) -> Result<String> {
        if let Ok(raw) = std::fs::read_to_string(&self.path) {
            let token = raw.trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        }

        if let Some(token) = self.env_token.as_deref().map(str::trim) {
            if !token.is_empty() {
                self.save(token);
                return Ok(token.to_string());
            }
        }

        bail!(
            "refresh token not found: set INOREADER_REFRESH_TOKEN or create a token file at {}",
            self.path.display()
        );
    }

    /// Persist the most recent refresh token so restarts reuse the correct
    /// value. A write failure is logged, not propagated.
    pub fn save(&self, token: &str) {
        let token = token.trim();
        if token.is_empty() {
            return;
        }
        if let Err(e) = std::fs::write(&self.path, token) {
            warn!(error = ?e, path = %self.path.display(), "failed to persist refresh token");
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Exchanges the refresh token for a bearer token and caches it until a 401
/// invalidates it.
pub struct Authenticator {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    store: TokenStore,
    cached: Mutex<Option<String>>,
}

impl Authenticator {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        store: TokenStore,
    ) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("significance-triager/0.1")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            store,
            cached: Mutex::new(None),
        }
    }

    /// Current bearer token, exchanging the refresh token if none is cached.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.exchange().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached access token; the next call re-exchanges. Called by the
    /// single-retry path after a 401.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn exchange(&self) -> Result<String> {
        let refresh_token = self.store.load()?;
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        let payload: TokenResponse = self
            .http
            .post(format!("{}/oauth2/token", self.base_url))
            .form(&form)
            .send()
            .await
            .context("token exchange post")?
            .error_for_status()
            .context("token exchange non-2xx")?
            .json()
            .await
            .context("token exchange body")?;

        // Rotate to the new refresh token when one is issued; otherwise
        // re-persist the old one so the file always holds last known good.
        match payload.refresh_token.as_deref().map(str::trim) {
            Some(rotated) if !rotated.is_empty() => {
                info!("refresh token rotated by the feed service");
                self.store.save(rotated);
            }
            _ => self.store.save(&refresh_token),
        }
        Ok(payload.access_token)
    }
}
