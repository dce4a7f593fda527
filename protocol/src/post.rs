use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A textual post extracted from a commit or a search result, not yet run
/// through the topic filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePost {
    pub text: String,
    /// DID of the repository that owns the post.
    pub author_id: String,
    /// Display name or handle when the source provides one. Firehose commits
    /// only carry the DID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_label: Option<String>,
    /// `at://{author_id}/{collection}/{rkey}`.
    pub uri: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repost_count: Option<u64>,
}

impl CandidatePost {
    pub fn new(
        text: impl Into<String>,
        author_id: impl Into<String>,
        uri: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            text: text.into(),
            author_id: author_id.into(),
            author_label: None,
            uri: uri.into(),
            created_at,
            is_reply: false,
            like_count: None,
            repost_count: None,
        }
    }

    /// Builds the canonical `at://` URI for a record in `repository_id` at
    /// `path` (`<collection>/<rkey>`).
    pub fn record_uri(repository_id: &str, path: &str) -> String {
        format!("at://{repository_id}/{path}")
    }

    /// The name shown to humans: the label when known, otherwise the DID.
    pub fn author_display(&self) -> &str {
        self.author_label.as_deref().unwrap_or(&self.author_id)
    }
}

/// A candidate that passed the topic filter and deduplication and became
/// part of a collection session's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedPost {
    /// 1-based position in acceptance order.
    pub ordinal: usize,
    #[serde(flatten)]
    pub post: CandidatePost,
}
