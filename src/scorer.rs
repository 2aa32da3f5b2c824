// src/scorer.rs
//! Significance scorer: one chat-completions request per batch, strict JSON
//! response keyed by `scores`, per-row coercion into a clamped one-decimal
//! score. Requires an OpenAI-compatible endpoint and API key.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::TriageConfig;

/// One article handed to the scorer: normalized id plus trimmed content.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScoreInput {
    pub id: String,
    pub content: String,
}

/// Seam between the triage loop and the scoring service. The returned map is
/// best-effort; callers default to 0.0 for ids absent from it.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score_batch(&self, batch: &[ScoreInput]) -> Result<HashMap<String, f64>>;

    /// Model identifier for diagnostics.
    fn model(&self) -> &str;
}

const SYSTEM_PROMPT: &str = "You are a careful scorer. \
     Output strictly valid JSON with the key 'scores'. \
     No prose, no extra keys.";

const INSTRUCTION: &str = "For each article, return a score from 0.0 to 10.0 based ONLY on the \
     provided content. Higher = more relevant for my stated preferences. If unclear, give 0.0. \
     Return JSON object: {\"scores\":[{\"id\":\"...\",\"score\":7.3}...]}. Use one decimal place.";

pub struct OpenAiScorer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    rubric: String,
}

impl OpenAiScorer {
    pub fn new(cfg: &TriageConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("significance-triager/0.1")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(90))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: cfg.scoring_base_url.clone(),
            api_key: cfg.scoring_api_key.clone(),
            model: cfg.model.clone(),
            rubric: cfg.rubric.clone(),
        }
    }
}

#[async_trait]
impl Scorer for OpenAiScorer {
    async fn score_batch(&self, batch: &[ScoreInput]) -> Result<HashMap<String, f64>> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            temperature: f32,
            response_format: ResponseFormat<'a>,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let user_payload = json!({
            "preferences": self.rubric,
            "instruction": INSTRUCTION,
            "articles": batch,
        })
        .to_string();

        let req = Req {
            model: &self.model,
            temperature: 1.0,
            response_format: ResponseFormat { kind: "json_object" },
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &user_payload,
                },
            ],
        };

        let body: Resp = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("scoring service request")?
            .error_for_status()
            .context("scoring service non-2xx")?
            .json()
            .await
            .context("scoring service body")?;

        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .context("scoring service returned no choices")?;
        parse_scores(content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Clamp into [0.0, 10.0] and round to one decimal place.
pub fn clamp_round(score: f64) -> f64 {
    (score.clamp(0.0, 10.0) * 10.0).round() / 10.0
}

/// Parse the strict `{"scores":[{"id":...,"score":...}]}` payload. The raw
/// body is carried in the error so a malformed response can be diagnosed.
/// Rows with a missing id or a non-finite score are dropped; scores given as
/// numeric strings are coerced.
pub fn parse_scores(raw: &str) -> Result<HashMap<String, f64>> {
    #[derive(Deserialize)]
    struct Parsed {
        scores: Vec<Row>,
    }
    #[derive(Deserialize)]
    struct Row {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        score: Option<serde_json::Value>,
    }

    let parsed: Parsed = serde_json::from_str(raw)
        .with_context(|| format!("malformed scorer response: {raw}"))?;

    let mut out = HashMap::with_capacity(parsed.scores.len());
    for row in parsed.scores {
        let (Some(id), Some(value)) = (row.id, row.score) else {
            continue;
        };
        let score = match value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        let Some(score) = score.filter(|s| s.is_finite()) else {
            continue;
        };
        out.insert(id, clamp_round(score));
    }
    Ok(out)
}
