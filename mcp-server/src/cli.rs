use std::sync::Arc;

use clap::Parser;
use skypulse_bsky_client::DEFAULT_SEARCH_BASE_URL;
use skypulse_bsky_client::SearchClient;
use skypulse_firehose::DEFAULT_FIREHOSE_ENDPOINT;
use skypulse_firehose::WebsocketConnector;
use skypulse_sentiment::NeutralScorer;
use skypulse_sentiment::SentimentScorer;
use skypulse_sentiment::WorkersAiConfig;
use skypulse_sentiment::WorkersAiScorer;
use tracing::warn;

use crate::tool_runner::DEFAULT_SCORING_CONCURRENCY;
use crate::tool_runner::ToolContext;

const USER_AGENT: &str = concat!("skypulse-mcp-server/", env!("CARGO_PKG_VERSION"));

/// Serves the `analyze_stock_posts` tool over stdio.
#[derive(Debug, Clone, Parser)]
#[command(version)]
pub struct Cli {
    /// Event stream endpoint: a relay `subscribeRepos` URL or a Jetstream URL.
    #[arg(long, env = "SKYPULSE_FIREHOSE_URL", default_value = DEFAULT_FIREHOSE_ENDPOINT)]
    pub firehose_url: String,

    /// Base URL of the AppView used by `source: "search"`.
    #[arg(long, env = "SKYPULSE_SEARCH_URL", default_value = DEFAULT_SEARCH_BASE_URL)]
    pub search_url: String,

    #[arg(long, env = "CLOUDFLARE_ACCOUNT_ID")]
    pub cloudflare_account_id: Option<String>,

    #[arg(long, env = "CLOUDFLARE_API_TOKEN", hide_env_values = true)]
    pub cloudflare_api_token: Option<String>,

    /// Sentiment requests kept in flight per tool call.
    #[arg(long, default_value_t = DEFAULT_SCORING_CONCURRENCY)]
    pub scoring_concurrency: usize,
}

impl Cli {
    /// Wires the real websocket, search and scoring collaborators.
    pub fn into_tool_context(self) -> anyhow::Result<ToolContext> {
        let search = SearchClient::new(self.search_url)?.with_user_agent(USER_AGENT);
        let connector = WebsocketConnector::new().with_user_agent(USER_AGENT);
        let scorer = build_scorer(self.cloudflare_account_id, self.cloudflare_api_token)?;

        Ok(
            ToolContext::new(Arc::new(connector), self.firehose_url, search, scorer)
                .with_scoring_concurrency(self.scoring_concurrency),
        )
    }
}

fn build_scorer(
    account_id: Option<String>,
    api_token: Option<String>,
) -> anyhow::Result<Arc<dyn SentimentScorer>> {
    match (account_id, api_token) {
        (Some(account_id), Some(api_token)) => {
            let scorer = WorkersAiScorer::new(WorkersAiConfig::new(account_id, api_token))?;
            Ok(Arc::new(scorer))
        }
        _ => {
            warn!("Workers AI credentials not set; every post will score as neutral");
            Ok(Arc::new(NeutralScorer))
        }
    }
}
