use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use serde::Serialize;
use skypulse_protocol::Sentiment;
use skypulse_protocol::SentimentLabel;
use tracing::debug;

use crate::error::ScoreError;
use crate::scorer::SentimentScorer;

pub const DEFAULT_WORKERS_AI_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
pub const DEFAULT_SENTIMENT_MODEL: &str = "@cf/huggingface/distilbert-sst-2-int8";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkersAiConfig {
    pub base_url: String,
    pub account_id: String,
    pub api_token: String,
    pub model: String,
}

impl Default for WorkersAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WORKERS_AI_BASE_URL.to_string(),
            account_id: String::new(),
            api_token: String::new(),
            model: DEFAULT_SENTIMENT_MODEL.to_string(),
        }
    }
}

impl WorkersAiConfig {
    pub fn new(account_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            api_token: api_token.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn run_url(&self) -> String {
        format!(
            "{}/accounts/{}/ai/run/{}",
            self.base_url.trim_end_matches('/'),
            self.account_id,
            self.model
        )
    }
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f32,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: Option<i64>,
    message: String,
}

/// The REST API wraps results in an envelope; the in-worker binding returns
/// the bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassifyResponse {
    Envelope {
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        result: Vec<LabelScore>,
        #[serde(default)]
        errors: Vec<ApiMessage>,
    },
    Bare(Vec<LabelScore>),
}

fn default_success() -> bool {
    true
}

/// Text classification through Cloudflare Workers AI.
#[derive(Debug, Clone)]
pub struct WorkersAiScorer {
    config: WorkersAiConfig,
    http: reqwest::Client,
}

impl WorkersAiScorer {
    pub fn new(config: WorkersAiConfig) -> Result<Self, ScoreError> {
        if config.account_id.is_empty() {
            return Err(ScoreError::NotConfigured("missing account id"));
        }
        if config.api_token.is_empty() {
            return Err(ScoreError::NotConfigured("missing API token"));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &WorkersAiConfig {
        &self.config
    }
}

#[async_trait]
impl SentimentScorer for WorkersAiScorer {
    async fn score(&self, text: &str) -> Result<Sentiment, ScoreError> {
        let url = self.config.run_url();
        let res = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_token)
            .header(USER_AGENT, HeaderValue::from_static("skypulse"))
            .json(&ClassifyRequest { text })
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ScoreError::Http {
                status: status.as_u16(),
                body,
            });
        }
        debug!("workers ai response: {body}");

        let response: ClassifyResponse = serde_json::from_str(&body)
            .map_err(|err| ScoreError::Decode(format!("{err}; body={body}")))?;
        best_label(response)
    }
}

fn best_label(response: ClassifyResponse) -> Result<Sentiment, ScoreError> {
    let scores = match response {
        ClassifyResponse::Envelope {
            success: false,
            errors,
            ..
        } => {
            let message = errors
                .iter()
                .map(|error| match error.code {
                    Some(code) => format!("{code}: {}", error.message),
                    None => error.message.clone(),
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ScoreError::Api(message));
        }
        ClassifyResponse::Envelope { result, .. } | ClassifyResponse::Bare(result) => result,
    };

    let best = scores
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .ok_or(ScoreError::EmptyResult)?;
    let label = parse_label(&best.label)?;
    Ok(Sentiment::new(label, best.score))
}

fn parse_label(label: &str) -> Result<SentimentLabel, ScoreError> {
    if label.eq_ignore_ascii_case("positive") {
        Ok(SentimentLabel::Positive)
    } else if label.eq_ignore_ascii_case("negative") {
        Ok(SentimentLabel::Negative)
    } else {
        Err(ScoreError::UnknownLabel(label.to_string()))
    }
}
