//! Runs one `analyze_stock_posts` call: collect, score, render.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use skypulse_bsky_client::SearchClient;
use skypulse_firehose::FirehoseConfig;
use skypulse_firehose::StreamConnector;
use skypulse_firehose::StreamSession;
use skypulse_firehose::TopicFilter;
use skypulse_mcp_types::CallToolResult;
use skypulse_mcp_types::LOGGING_MESSAGE_NOTIFICATION_METHOD;
use skypulse_mcp_types::LoggingLevel;
use skypulse_mcp_types::LoggingMessageNotificationParams;
use skypulse_mcp_types::RequestId;
use skypulse_protocol::CollectedPost;
use skypulse_sentiment::SentimentScorer;
use skypulse_sentiment::score_posts;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::outgoing_message::OutgoingMessageSender;
use crate::outgoing_message::OutgoingNotification;
use crate::render::NO_POSTS_MESSAGE;
use crate::render::error_message;
use crate::render::render_report;
use crate::tool_config::AnalyzeRequest;
use crate::tool_config::AnalyzeStockPostsParams;
use crate::tool_config::CollectionSource;

pub const DEFAULT_SCORING_CONCURRENCY: usize = 4;

/// Collaborators shared by every tool call.
pub struct ToolContext {
    connector: Arc<dyn StreamConnector>,
    firehose_endpoint: String,
    search: SearchClient,
    scorer: Arc<dyn SentimentScorer>,
    topic: Arc<TopicFilter>,
    scoring_concurrency: usize,
}

/// Posts gathered by one collection run.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub posts: Vec<CollectedPost>,
    pub window: Duration,
    /// Why collection stopped, for logs.
    pub stop_reason: String,
}

impl ToolContext {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        firehose_endpoint: impl Into<String>,
        search: SearchClient,
        scorer: Arc<dyn SentimentScorer>,
    ) -> Self {
        Self {
            connector,
            firehose_endpoint: firehose_endpoint.into(),
            search,
            scorer,
            topic: Arc::new(TopicFilter::stock_market()),
            scoring_concurrency: DEFAULT_SCORING_CONCURRENCY,
        }
    }

    pub fn with_topic(mut self, topic: TopicFilter) -> Self {
        self.topic = Arc::new(topic);
        self
    }

    pub fn with_scoring_concurrency(mut self, concurrency: usize) -> Self {
        self.scoring_concurrency = concurrency.max(1);
        self
    }

    /// Gathers up to `request.count` topical posts from the requested source
    /// within `request.timeout`.
    pub async fn collect(
        &self,
        request: AnalyzeRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<Collection> {
        match request.source {
            CollectionSource::Firehose => {
                let config = FirehoseConfig {
                    endpoint: self.firehose_endpoint.clone(),
                    target_count: request.count,
                    deadline: request.timeout,
                    ..FirehoseConfig::default()
                };
                let outcome = StreamSession::new(
                    config,
                    Arc::clone(&self.connector),
                    Arc::clone(&self.topic),
                )
                .with_cancellation(cancel)
                .run()
                .await?;
                info!(
                    "firehose session finished: {:?}, {} posts, {:?}",
                    outcome.trigger,
                    outcome.posts.len(),
                    outcome.stats
                );
                Ok(Collection {
                    posts: outcome.posts,
                    window: outcome.elapsed,
                    stop_reason: format!("{:?}", outcome.trigger),
                })
            }
            CollectionSource::Search => {
                let started = Instant::now();
                let mut posts = Vec::new();
                let stop_reason = {
                    let search = self.search.collect_topic_posts(
                        request.count.get(),
                        &self.topic,
                        &mut posts,
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => "Cancelled",
                        result = tokio::time::timeout(request.timeout, search) => match result {
                            Ok(()) => "Complete",
                            Err(_) => {
                                warn!("search did not finish within {:?}", request.timeout);
                                "Deadline"
                            }
                        },
                    }
                };
                Ok(Collection {
                    posts,
                    window: started.elapsed(),
                    stop_reason: stop_reason.to_string(),
                })
            }
        }
    }

    /// Collects, scores and renders. Zero posts is not an error.
    pub async fn analyze_stock_posts(
        &self,
        request: AnalyzeRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<(Collection, String)> {
        let collection = self.collect(request, cancel).await?;
        if collection.posts.is_empty() {
            return Ok((collection, NO_POSTS_MESSAGE.to_string()));
        }

        let analyzed = score_posts(
            self.scorer.as_ref(),
            collection.posts.clone(),
            self.scoring_concurrency,
        )
        .await;
        let text = render_report(request.source, collection.window, &analyzed);
        Ok((collection, text))
    }
}

/// Handles a `tools/call` for `analyze_stock_posts` and sends exactly one
/// response for `id`.
pub(crate) async fn run_analyze_stock_posts(
    id: RequestId,
    arguments: Option<Value>,
    tools: Arc<ToolContext>,
    outgoing: OutgoingMessageSender,
    cancel: CancellationToken,
) {
    let params = match serde_json::from_value::<AnalyzeStockPostsParams>(
        arguments.unwrap_or_else(|| json!({})),
    ) {
        Ok(params) => params,
        Err(err) => {
            let result = CallToolResult::error(format!(
                "Failed to parse arguments for analyze_stock_posts: {err}"
            ));
            outgoing.send_response(id, result).await;
            return;
        }
    };
    let request = match params.into_request() {
        Ok(request) => request,
        Err(message) => {
            let result = CallToolResult::error(format!("Invalid arguments: {message}"));
            outgoing.send_response(id, result).await;
            return;
        }
    };

    info!(
        "starting collection: {} posts from {:?}, {}s timeout",
        request.count,
        request.source,
        request.timeout.as_secs()
    );

    let result = match tools.analyze_stock_posts(request, cancel).await {
        Ok((collection, text)) => {
            send_log(
                &outgoing,
                LoggingLevel::Info,
                json!({
                    "requestId": id,
                    "source": request.source,
                    "collected": collection.posts.len(),
                    "stopReason": collection.stop_reason,
                    "windowSeconds": collection.window.as_secs_f64(),
                }),
            )
            .await;
            CallToolResult::text(text)
        }
        Err(err) => {
            warn!("analyze_stock_posts failed: {err:#}");
            CallToolResult::error(error_message(&err))
        }
    };
    outgoing.send_response(id, result).await;
}

async fn send_log(outgoing: &OutgoingMessageSender, level: LoggingLevel, data: Value) {
    let params = LoggingMessageNotificationParams {
        level,
        logger: Some("skypulse".to_string()),
        data,
    };
    match serde_json::to_value(params) {
        Ok(params) => {
            outgoing
                .send_notification(OutgoingNotification {
                    method: LOGGING_MESSAGE_NOTIFICATION_METHOD.to_string(),
                    params: Some(params),
                })
                .await;
        }
        Err(err) => warn!("failed to serialize log notification: {err}"),
    }
}
