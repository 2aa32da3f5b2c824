// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod auth;
pub mod config;
pub mod feed;
pub mod scorer;
pub mod triage;

// ---- Re-exports for stable public API ----
pub use crate::config::TriageConfig;
pub use crate::feed::{FeedItem, FeedService, StreamPage};
pub use crate::scorer::{ScoreInput, Scorer};
pub use crate::triage::{run_cycle, run_forever, CycleReport, Tier};
