//! Significance Triager — Binary Entrypoint
//! Resolves configuration, wires the feed and scoring clients, and runs the
//! poll loop forever. Exit only via external termination.

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use significance_triager::auth::{Authenticator, TokenStore};
use significance_triager::feed::FeedClient;
use significance_triager::scorer::OpenAiScorer;
use significance_triager::{triage, TriageConfig};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = TriageConfig::from_env()?;

    let store = TokenStore::new(cfg.refresh_token_file.clone(), cfg.refresh_token_env.clone());
    let auth = Arc::new(Authenticator::new(
        cfg.feed_base_url.clone(),
        cfg.client_id.clone(),
        cfg.client_secret.clone(),
        store,
    ));
    let feed = FeedClient::new(&cfg, auth);
    let scorer = OpenAiScorer::new(&cfg);

    triage::run_forever(&cfg, &feed, &scorer).await;
    Ok(())
}
