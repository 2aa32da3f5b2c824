// src/triage.rs
//! The triage loop: fetch everything under the triage label, score it in
//! batches, tag the high/medium tiers, and always clear the triage label from
//! every fetched item. One cycle per poll interval, forever; a failed cycle
//! is logged and retried after the sleep, never fatal to the process.

use anyhow::Result;
use metrics::{counter, gauge};
use tracing::{error, info};

use crate::config::TriageConfig;
use crate::feed::{apply_tag_edit, fetch_labeled_items, normalize_ids, FeedService};
use crate::scorer::{ScoreInput, Scorer};

pub const HIGH_TAG: &str = "user/-/label/significant";
pub const MEDIUM_TAG: &str = "user/-/label/medium";
pub const READ_STATE: &str = "user/-/state/com.google/read";

/// Significance bucket derived from a score. Strict partition: an item is
/// never both high and medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    High,
    Medium,
    None,
}

pub fn classify(score: f64, high_border: f64, medium_border: f64) -> Tier {
    if score >= high_border {
        Tier::High
    } else if score >= medium_border {
        Tier::Medium
    } else {
        Tier::None
    }
}

/// What one cycle did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub scored: usize,
    pub high: usize,
    pub medium: usize,
}

/// Run one full triage cycle. Tagging only happens after every batch has been
/// scored, so a scorer failure leaves all remote tags untouched and the items
/// are re-fetched next cycle.
pub async fn run_cycle(
    cfg: &TriageConfig,
    feed: &dyn FeedService,
    scorer: &dyn Scorer,
) -> Result<CycleReport> {
    info!(label = %cfg.stream_label, "fetching items awaiting triage");
    let items = fetch_labeled_items(feed).await?;
    if items.is_empty() {
        info!("no items found");
        return Ok(CycleReport::default());
    }

    let items = normalize_ids(items);
    let all_ids: Vec<String> = items.iter().map(|it| it.id.clone()).collect();

    // Only items with non-empty content get scored; the rest still have the
    // triage label cleared below.
    let pairs: Vec<ScoreInput> = items
        .iter()
        .filter(|it| !it.summary.content.trim().is_empty())
        .map(|it| ScoreInput {
            id: it.id.clone(),
            content: it.summary.content.trim().to_string(),
        })
        .collect();

    let mut high_ids: Vec<String> = Vec::new();
    let mut medium_ids: Vec<String> = Vec::new();
    if pairs.is_empty() {
        info!("no items with content to score");
    }
    for batch in pairs.chunks(cfg.batch_size.max(1)) {
        info!(batch = batch.len(), model = scorer.model(), "sending contents for scoring");
        let scores = scorer.score_batch(batch).await?;
        for p in batch {
            let score = scores.get(&p.id).copied().unwrap_or(0.0);
            match classify(score, cfg.high_border, cfg.medium_border) {
                Tier::High => high_ids.push(p.id.clone()),
                Tier::Medium => medium_ids.push(p.id.clone()),
                Tier::None => {}
            }
        }
    }
    if !pairs.is_empty() {
        info!(
            high = high_ids.len(),
            medium = medium_ids.len(),
            high_border = cfg.high_border,
            medium_border = cfg.medium_border,
            "scoring totals"
        );
    }

    apply_tag_edit(feed, &high_ids, &[HIGH_TAG], &[READ_STATE], cfg.batch_size).await?;
    apply_tag_edit(feed, &medium_ids, &[MEDIUM_TAG], &[READ_STATE], cfg.batch_size).await?;

    // Always clear the triage label from every fetched item, scored or not.
    let stream_id = cfg.stream_id();
    info!(count = all_ids.len(), label = %cfg.stream_label, "removing triage label");
    apply_tag_edit(feed, &all_ids, &[], &[stream_id.as_str()], cfg.batch_size).await?;

    let report = CycleReport {
        fetched: all_ids.len(),
        scored: pairs.len(),
        high: high_ids.len(),
        medium: medium_ids.len(),
    };
    counter!("triage_items_processed_total").increment(report.fetched as u64);
    counter!("triage_items_scored_total").increment(report.scored as u64);
    Ok(report)
}

/// The poll loop: run a cycle, log its outcome, sleep, repeat. Never returns;
/// only external termination stops the process.
pub async fn run_forever(cfg: &TriageConfig, feed: &dyn FeedService, scorer: &dyn Scorer) {
    let interval = cfg.poll_interval();
    info!(
        interval_secs = interval.as_secs(),
        high_border = cfg.high_border,
        medium_border = cfg.medium_border,
        stream = %cfg.stream_id(),
        "starting triager"
    );
    loop {
        match run_cycle(cfg, feed, scorer).await {
            Ok(report) => {
                info!(
                    fetched = report.fetched,
                    scored = report.scored,
                    high = report.high,
                    medium = report.medium,
                    "cycle complete"
                );
            }
            Err(e) => {
                error!(error = ?e, "cycle failed, will retry after the poll interval");
                counter!("triage_cycle_errors_total").increment(1);
            }
        }
        counter!("triage_cycles_total").increment(1);
        gauge!("triage_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_a_strict_partition() {
        let (high, medium) = (6.5, 5.0);
        assert_eq!(classify(10.0, high, medium), Tier::High);
        assert_eq!(classify(6.5, high, medium), Tier::High);
        assert_eq!(classify(6.4, high, medium), Tier::Medium);
        assert_eq!(classify(5.0, high, medium), Tier::Medium);
        assert_eq!(classify(4.9, high, medium), Tier::None);
        assert_eq!(classify(0.0, high, medium), Tier::None);
    }

    #[test]
    fn batch_chunking_splits_120_into_50_50_20() {
        let ids: Vec<u32> = (0..120).collect();
        let sizes: Vec<usize> = ids.chunks(50).map(<[u32]>::len).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
    }
}
