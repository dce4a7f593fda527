//! Arguments and schema for the `analyze_stock_posts` tool.

use std::num::NonZeroUsize;
use std::ops::RangeInclusive;
use std::time::Duration;

use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use serde::Deserialize;
use serde::Serialize;
use skypulse_mcp_types::Tool;

pub const ANALYZE_STOCK_POSTS_TOOL_NAME: &str = "analyze_stock_posts";

const DEFAULT_COUNT: usize = 2;
const COUNT_RANGE: RangeInclusive<usize> = 1..=10;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const TIMEOUT_SECONDS_RANGE: RangeInclusive<u64> = 5..=60;

/// Where posts are collected from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CollectionSource {
    /// The live repository event stream.
    #[default]
    Firehose,
    /// Keyword search over recent posts.
    Search,
}

impl CollectionSource {
    pub fn description(self) -> &'static str {
        match self {
            CollectionSource::Firehose => "Bluesky Firehose",
            CollectionSource::Search => "Bluesky Search",
        }
    }
}

/// Client-supplied arguments for `analyze_stock_posts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeStockPostsParams {
    /// Number of stock posts to collect from the live stream (1-10, default 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 10))]
    pub count: Option<usize>,

    /// Maximum time (in seconds) to wait for collecting posts (5-60, default 30).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 5, max = 60))]
    pub timeout_seconds: Option<u64>,

    /// Collect from the live firehose (default) or from keyword search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<CollectionSource>,
}

/// Validated form of [`AnalyzeStockPostsParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzeRequest {
    pub count: NonZeroUsize,
    pub timeout: Duration,
    pub source: CollectionSource,
}

impl AnalyzeStockPostsParams {
    pub fn into_request(self) -> Result<AnalyzeRequest, String> {
        let count = self.count.unwrap_or(DEFAULT_COUNT);
        if !COUNT_RANGE.contains(&count) {
            return Err(format!(
                "`count` must be between {} and {}, got {count}",
                COUNT_RANGE.start(),
                COUNT_RANGE.end()
            ));
        }
        let timeout_seconds = self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        if !TIMEOUT_SECONDS_RANGE.contains(&timeout_seconds) {
            return Err(format!(
                "`timeoutSeconds` must be between {} and {}, got {timeout_seconds}",
                TIMEOUT_SECONDS_RANGE.start(),
                TIMEOUT_SECONDS_RANGE.end()
            ));
        }
        let count = NonZeroUsize::new(count).ok_or_else(|| "`count` must be positive".to_string())?;

        Ok(AnalyzeRequest {
            count,
            timeout: Duration::from_secs(timeout_seconds),
            source: self.source.unwrap_or_default(),
        })
    }
}

/// Builds the `Tool` definition advertised by `tools/list`.
pub(crate) fn create_tool_for_analyze_stock_posts() -> Tool {
    let schema = SchemaSettings::draft2019_09()
        .with(|s| {
            s.inline_subschemas = true;
            s.option_add_null_type = false;
        })
        .into_generator()
        .into_root_schema_for::<AnalyzeStockPostsParams>();

    #[expect(clippy::expect_used)]
    let mut input_schema =
        serde_json::to_value(&schema).expect("tool schema should serialize to JSON");
    if let serde_json::Value::Object(ref mut obj) = input_schema {
        obj.remove("$schema");
        obj.remove("title");
    }

    Tool {
        name: ANALYZE_STOCK_POSTS_TOOL_NAME.to_string(),
        title: Some("Analyze Stock Posts".to_string()),
        description: Some(
            "Tap into the Bluesky firehose, collect stock-related posts in real time, and analyze their sentiment."
                .to_string(),
        ),
        input_schema,
    }
}
