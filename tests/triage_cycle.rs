// tests/triage_cycle.rs
// Full-cycle behavior against recording mocks: tier partition, batching,
// unconditional triage-label removal, and idempotence on a drained stream.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use significance_triager::config::DEFAULT_RUBRIC;
use significance_triager::feed::{FeedItem, FeedService, StreamPage};
use significance_triager::triage::{run_cycle, HIGH_TAG, MEDIUM_TAG, READ_STATE};
use significance_triager::{ScoreInput, Scorer, TriageConfig};

fn cfg() -> TriageConfig {
    TriageConfig {
        feed_base_url: "http://feed.test".into(),
        scoring_base_url: "http://score.test".into(),
        stream_label: "significance_todo".into(),
        high_border: 6.5,
        medium_border: 5.0,
        max_fetch: 100,
        batch_size: 50,
        model: "gpt-5-nano".into(),
        refresh_token_file: PathBuf::from("last_refresh_token.txt"),
        poll_every_hours: 4.0,
        rubric: DEFAULT_RUBRIC.trim().to_string(),
        client_id: "cid".into(),
        client_secret: "csecret".into(),
        refresh_token_env: None,
        scoring_api_key: "sk-test".into(),
        app_id: None,
        app_key: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EditCall {
    ids: Vec<String>,
    add: Vec<String>,
    remove: Vec<String>,
}

/// Feed mock: serves queued fetch results (one per cycle) and records every
/// tag edit.
struct RecordingFeed {
    fetches: Mutex<VecDeque<Vec<FeedItem>>>,
    edits: Mutex<Vec<EditCall>>,
}

impl RecordingFeed {
    fn new(fetches: Vec<Vec<FeedItem>>) -> Self {
        Self {
            fetches: Mutex::new(fetches.into()),
            edits: Mutex::new(Vec::new()),
        }
    }

    fn edits(&self) -> Vec<EditCall> {
        self.edits.lock().clone()
    }

    fn take_edits(&self) -> Vec<EditCall> {
        std::mem::take(&mut *self.edits.lock())
    }
}

#[async_trait]
impl FeedService for RecordingFeed {
    async fn stream_page(&self, _cursor: Option<&str>) -> Result<StreamPage> {
        let items = self.fetches.lock().pop_front().unwrap_or_default();
        Ok(StreamPage {
            items,
            continuation: None,
        })
    }

    async fn edit_tags(&self, ids: &[String], add: &[&str], remove: &[&str]) -> Result<()> {
        self.edits.lock().push(EditCall {
            ids: ids.to_vec(),
            add: add.iter().map(|t| t.to_string()).collect(),
            remove: remove.iter().map(|t| t.to_string()).collect(),
        });
        Ok(())
    }
}

/// Scorer mock returning fixed scores keyed by normalized id.
struct MapScorer {
    scores: HashMap<String, f64>,
    batch_sizes: Mutex<Vec<usize>>,
}

impl MapScorer {
    fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores
                .iter()
                .map(|(id, s)| (id.to_string(), *s))
                .collect(),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Scorer for MapScorer {
    async fn score_batch(&self, batch: &[ScoreInput]) -> Result<HashMap<String, f64>> {
        self.batch_sizes.lock().push(batch.len());
        Ok(batch
            .iter()
            .filter_map(|p| self.scores.get(&p.id).map(|s| (p.id.clone(), *s)))
            .collect())
    }

    fn model(&self) -> &str {
        "mock"
    }
}

/// Scorer mock that fails every batch, as a malformed response would.
struct FailingScorer;

#[async_trait]
impl Scorer for FailingScorer {
    async fn score_batch(&self, _batch: &[ScoreInput]) -> Result<HashMap<String, f64>> {
        bail!("malformed scorer response: not json");
    }

    fn model(&self) -> &str {
        "mock"
    }
}

fn item(n: u64, content: &str) -> FeedItem {
    FeedItem::new(format!("tag:google.com,2005:reader/item/{n:016x}"), content)
}

fn removal_ids(edits: &[EditCall], stream_id: &str) -> Vec<String> {
    edits
        .iter()
        .filter(|e| e.remove == [stream_id.to_string()] && e.add.is_empty())
        .flat_map(|e| e.ids.clone())
        .collect()
}

#[tokio::test]
async fn tiers_are_tagged_and_triage_label_cleared_for_all() {
    let cfg = cfg();
    let feed = RecordingFeed::new(vec![vec![
        item(1, "war breaks out"),     // 8.0 -> high
        item(2, "rate cut announced"), // 5.5 -> medium
        item(3, "bakery wins award"),  // 2.0 -> none
        item(4, "   "),                // empty content, never scored
    ]]);
    let scorer = MapScorer::new(&[("1", 8.0), ("2", 5.5), ("3", 2.0)]);

    let report = run_cycle(&cfg, &feed, &scorer).await.unwrap();
    assert_eq!(report.fetched, 4);
    assert_eq!(report.scored, 3);
    assert_eq!(report.high, 1);
    assert_eq!(report.medium, 1);

    let edits = feed.edits();
    let high: Vec<_> = edits
        .iter()
        .filter(|e| e.add == [HIGH_TAG.to_string()])
        .collect();
    assert_eq!(high.len(), 1);
    assert_eq!(high[0].ids, vec!["1".to_string()]);
    assert_eq!(high[0].remove, vec![READ_STATE.to_string()]);

    let medium: Vec<_> = edits
        .iter()
        .filter(|e| e.add == [MEDIUM_TAG.to_string()])
        .collect();
    assert_eq!(medium.len(), 1);
    assert_eq!(medium[0].ids, vec!["2".to_string()]);

    // Every fetched item loses the triage label, scored or not.
    let mut cleared = removal_ids(&edits, &cfg.stream_id());
    cleared.sort();
    assert_eq!(cleared, vec!["1", "2", "3", "4"]);
}

#[tokio::test]
async fn low_score_item_gets_no_tier_but_is_cleared() {
    let cfg = cfg();
    let feed = RecordingFeed::new(vec![vec![item(1, "Local bakery wins award")]]);
    let scorer = MapScorer::new(&[("1", 2.0)]);

    let report = run_cycle(&cfg, &feed, &scorer).await.unwrap();
    assert_eq!(report.high, 0);
    assert_eq!(report.medium, 0);

    let edits = feed.edits();
    assert!(edits.iter().all(|e| e.add.is_empty()));
    assert_eq!(removal_ids(&edits, &cfg.stream_id()), vec!["1"]);
}

#[tokio::test]
async fn missing_score_defaults_to_zero() {
    let cfg = cfg();
    let feed = RecordingFeed::new(vec![vec![item(1, "unscored article")]]);
    let scorer = MapScorer::new(&[]);

    let report = run_cycle(&cfg, &feed, &scorer).await.unwrap();
    assert_eq!(report.scored, 1);
    assert_eq!(report.high, 0);
    assert_eq!(report.medium, 0);
    assert_eq!(removal_ids(&feed.edits(), &cfg.stream_id()), vec!["1"]);
}

#[tokio::test]
async fn scoring_and_tagging_are_batched_by_fifty() {
    let cfg = cfg();
    let items: Vec<FeedItem> = (1..=120).map(|n| item(n, "some content")).collect();
    let scores: Vec<(String, f64)> = (1..=120).map(|n| (n.to_string(), 9.0)).collect();
    let scores_ref: Vec<(&str, f64)> = scores.iter().map(|(id, s)| (id.as_str(), *s)).collect();

    let feed = RecordingFeed::new(vec![items]);
    let scorer = MapScorer::new(&scores_ref);

    let report = run_cycle(&cfg, &feed, &scorer).await.unwrap();
    assert_eq!(report.fetched, 120);
    assert_eq!(report.high, 120);
    assert_eq!(*scorer.batch_sizes.lock(), vec![50, 50, 20]);

    // High tagging and label removal are chunked identically.
    let edits = feed.edits();
    let high_sizes: Vec<usize> = edits
        .iter()
        .filter(|e| e.add == [HIGH_TAG.to_string()])
        .map(|e| e.ids.len())
        .collect();
    assert_eq!(high_sizes, vec![50, 50, 20]);
    let removal_sizes: Vec<usize> = edits
        .iter()
        .filter(|e| e.remove == [cfg.stream_id()])
        .map(|e| e.ids.len())
        .collect();
    assert_eq!(removal_sizes, vec![50, 50, 20]);
}

#[tokio::test]
async fn second_cycle_on_drained_stream_issues_no_edits() {
    let cfg = cfg();
    let feed = RecordingFeed::new(vec![
        vec![item(1, "one-off item")],
        Vec::new(), // label emptied by the first cycle
    ]);
    let scorer = MapScorer::new(&[("1", 7.0)]);

    run_cycle(&cfg, &feed, &scorer).await.unwrap();
    assert!(!feed.take_edits().is_empty());

    let report = run_cycle(&cfg, &feed, &scorer).await.unwrap();
    assert_eq!(report, significance_triager::CycleReport::default());
    assert!(feed.edits().is_empty());
}

#[tokio::test]
async fn scorer_failure_aborts_the_cycle_before_any_tagging() {
    let cfg = cfg();
    let feed = RecordingFeed::new(vec![vec![item(1, "content"), item(2, "more content")]]);

    let err = run_cycle(&cfg, &feed, &FailingScorer).await.unwrap_err();
    assert!(err.to_string().contains("malformed"));
    // Tagging happens only after all batches score, so the triage label stays
    // in place and the items will be re-fetched next cycle.
    assert!(feed.edits().is_empty());
}

#[tokio::test]
async fn items_without_ids_are_dropped_silently() {
    let cfg = cfg();
    let feed = RecordingFeed::new(vec![vec![item(1, "kept"), FeedItem::new("", "no id")]]);
    let scorer = MapScorer::new(&[("1", 1.0)]);

    let report = run_cycle(&cfg, &feed, &scorer).await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(removal_ids(&feed.edits(), &cfg.stream_id()), vec!["1"]);
}
