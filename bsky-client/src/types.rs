//! Subset of the `app.bsky.feed.searchPosts` response that search needs.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::de::IgnoredAny;
use skypulse_protocol::CandidatePost;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchPostsResponse {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub posts: Vec<PostView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub author: ProfileViewBasic,
    #[serde(default)]
    pub record: PostViewRecord,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub repost_count: Option<u64>,
    #[serde(default)]
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewBasic {
    pub did: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostViewRecord {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub reply: Option<IgnoredAny>,
}

impl PostView {
    /// Converts to a candidate, or `None` when the post has no text.
    pub fn into_candidate(self, fetched_at: DateTime<Utc>) -> Option<CandidatePost> {
        let text = self
            .record
            .text
            .filter(|text| !text.trim().is_empty())?;
        let created_at = [self.record.created_at.as_deref(), self.indexed_at.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map_or(fetched_at, |parsed| parsed.with_timezone(&Utc));
        let author_label = self
            .author
            .display_name
            .filter(|name| !name.trim().is_empty())
            .or(self.author.handle);

        let mut post = CandidatePost::new(text, self.author.did, self.uri, created_at);
        post.author_label = author_label;
        post.is_reply = self.record.reply.is_some();
        post.like_count = self.like_count;
        post.repost_count = self.repost_count;
        Some(post)
    }
}
