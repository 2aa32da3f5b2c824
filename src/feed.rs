// src/feed.rs
//! Feed service client (Google Reader compatible API): cursor-paginated
//! stream reads, batched tag edits, and the single re-auth-and-retry policy
//! for expired access tokens.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::warn;

use crate::auth::Authenticator;
use crate::config::TriageConfig;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Summary {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct FeedItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub summary: Summary,
}

impl FeedItem {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            summary: Summary {
                content: content.into(),
            },
        }
    }
}

/// One page of stream contents plus the cursor for the next one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamPage {
    #[serde(default)]
    pub items: Vec<FeedItem>,
    #[serde(default)]
    pub continuation: Option<String>,
}

/// Seam between the triage loop and the feed service. Implemented by
/// [`FeedClient`] in production and by recording mocks in tests.
#[async_trait]
pub trait FeedService: Send + Sync {
    /// Fetch one page of items under the triage label.
    async fn stream_page(&self, cursor: Option<&str>) -> Result<StreamPage>;

    /// Add/remove tags on the given items in a single request.
    async fn edit_tags(&self, ids: &[String], add: &[&str], remove: &[&str]) -> Result<()>;
}

/// Follow continuation cursors until the service stops returning one,
/// concatenating all pages in order.
pub async fn fetch_labeled_items(feed: &dyn FeedService) -> Result<Vec<FeedItem>> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = feed.stream_page(cursor.as_deref()).await?;
        items.extend(page.items);
        match page.continuation {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok(items)
}

/// Rewrite a service-native item id (slash-delimited path ending in a hex
/// suffix) to the decimal string form of that suffix.
pub fn normalize_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let suffix = raw.rsplit('/').next()?;
    u64::from_str_radix(suffix, 16).ok().map(|v| v.to_string())
}

/// Normalize all item ids in place; items with a missing or unparseable id
/// are dropped.
pub fn normalize_ids(items: Vec<FeedItem>) -> Vec<FeedItem> {
    let mut out = Vec::with_capacity(items.len());
    for mut item in items {
        match normalize_id(&item.id) {
            Some(id) => {
                item.id = id;
                out.push(item);
            }
            None => {
                if !item.id.trim().is_empty() {
                    warn!(id = %item.id, "dropping item with unparseable id");
                }
            }
        }
    }
    out
}

/// Issue one tag edit per fixed-size chunk of ids. Zero requests for an
/// empty id list.
pub async fn apply_tag_edit(
    feed: &dyn FeedService,
    ids: &[String],
    add: &[&str],
    remove: &[&str],
    batch_size: usize,
) -> Result<()> {
    for chunk in ids.chunks(batch_size.max(1)) {
        feed.edit_tags(chunk, add, remove).await?;
    }
    Ok(())
}

pub struct FeedClient {
    http: reqwest::Client,
    base_url: String,
    stream_id: String,
    max_fetch: u32,
    auth: Arc<Authenticator>,
    app_headers: Option<(String, String)>,
}

impl FeedClient {
    pub fn new(cfg: &TriageConfig, auth: Arc<Authenticator>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("significance-triager/0.1")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: cfg.feed_base_url.clone(),
            stream_id: cfg.stream_id(),
            max_fetch: cfg.max_fetch,
            auth,
            app_headers: cfg.app_id.clone().zip(cfg.app_key.clone()),
        }
    }

    /// Attempt once; on a 401 refresh the credential and attempt exactly once
    /// more; any further failure propagates.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let resp = self.dispatch(build()).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return resp.error_for_status().context("feed service non-2xx");
        }
        warn!("feed service returned 401, refreshing access token");
        self.auth.invalidate().await;
        self.dispatch(build())
            .await?
            .error_for_status()
            .context("feed service non-2xx after re-auth")
    }

    async fn dispatch(&self, mut req: RequestBuilder) -> Result<reqwest::Response> {
        let token = self.auth.access_token().await?;
        req = req.bearer_auth(token);
        if let Some((id, key)) = &self.app_headers {
            req = req.header("AppId", id).header("AppKey", key);
        }
        req.send().await.context("feed service request")
    }

    fn stream_contents_url(&self) -> String {
        format!(
            "{}/reader/api/0/stream/contents/{}",
            self.base_url,
            utf8_percent_encode(&self.stream_id, NON_ALPHANUMERIC)
        )
    }
}

#[async_trait]
impl FeedService for FeedClient {
    async fn stream_page(&self, cursor: Option<&str>) -> Result<StreamPage> {
        let url = self.stream_contents_url();
        let mut params = vec![("n", self.max_fetch.to_string())];
        if let Some(c) = cursor {
            params.push(("c", c.to_string()));
        }
        let resp = self
            .send_authorized(|| self.http.get(&url).query(&params))
            .await?;
        resp.json().await.context("stream contents body")
    }

    async fn edit_tags(&self, ids: &[String], add: &[&str], remove: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        // Form-encoded repeated fields: a=<tag>, r=<tag>, i=<item id>.
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(add.len() + remove.len() + ids.len());
        form.extend(add.iter().map(|t| ("a", *t)));
        form.extend(remove.iter().map(|t| ("r", *t)));
        form.extend(ids.iter().map(|i| ("i", i.as_str())));

        let url = format!("{}/reader/api/0/edit-tag", self.base_url);
        self.send_authorized(|| self.http.post(&url).form(&form))
            .await?;
        Ok(())
    }
}
