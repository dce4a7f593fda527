use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;
use skypulse_firehose::TopicFilter;
use skypulse_protocol::CandidatePost;
use skypulse_protocol::CollectedPost;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::SearchError;
use crate::types::SearchPostsResponse;

pub const DEFAULT_SEARCH_BASE_URL: &str = "https://api.bsky.app";

/// Queries tried, in order, by [`SearchClient::search_topic_posts`].
pub const SEARCH_TERMS: &[&str] = &[
    "stock market",
    "stocks",
    "trading",
    "investing",
    "bull market",
    "bear market",
    "portfolio",
    "nasdaq",
    "dow jones",
];
const TERMS_PER_SEARCH: usize = 3;
const MAX_PER_TERM: usize = 25;
const MAX_PAGE_SIZE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Keyword search over the public Bluesky AppView.
#[derive(Clone, Debug)]
pub struct SearchClient {
    base_url: String,
    http: reqwest::Client,
    user_agent: Option<HeaderValue>,
}

impl SearchClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SearchError> {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url,
            http,
            user_agent: None,
        })
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        if let Ok(hv) = HeaderValue::from_str(&ua.into()) {
            self.user_agent = Some(hv);
        }
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(ua) = &self.user_agent {
            h.insert(USER_AGENT, ua.clone());
        } else {
            h.insert(USER_AGENT, HeaderValue::from_static("skypulse"));
        }
        h
    }

    async fn exec_request(
        &self,
        req: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<(String, String), SearchError> {
        let res = req.send().await?;
        let status = res.status();
        let ct = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SearchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok((body, ct))
    }

    fn decode_json<T: DeserializeOwned>(
        &self,
        url: &str,
        ct: &str,
        body: &str,
    ) -> Result<T, SearchError> {
        serde_json::from_str::<T>(body).map_err(|e| SearchError::Decode {
            url: url.to_string(),
            message: format!("{e}; content-type={ct}; body={body}"),
        })
    }

    /// Fetches up to `limit` of the most recent posts matching `term`,
    /// following result pages until the limit is met or results run out.
    pub async fn search(
        &self,
        term: &str,
        limit: usize,
    ) -> Result<Vec<CandidatePost>, SearchError> {
        let url = format!("{}/xrpc/app.bsky.feed.searchPosts", self.base_url);
        let mut posts = Vec::new();
        let mut cursor: Option<String> = None;

        while posts.len() < limit {
            let page_size = (limit - posts.len()).min(MAX_PAGE_SIZE);
            let req = self
                .http
                .get(&url)
                .headers(self.headers())
                .query(&[("q", term), ("sort", "latest")])
                .query(&[("limit", page_size)]);
            let req = if let Some(c) = &cursor {
                req.query(&[("cursor", c)])
            } else {
                req
            };
            let (body, ct) = self.exec_request(req, &url).await?;
            let page: SearchPostsResponse = self.decode_json(&url, &ct, &body)?;
            debug!(
                "search page for {term:?}: {} posts, cursor={:?}",
                page.posts.len(),
                page.cursor
            );

            let page_len = page.posts.len();
            let remaining = limit - posts.len();
            let fetched_at = Utc::now();
            posts.extend(
                page.posts
                    .into_iter()
                    .filter_map(|view| view.into_candidate(fetched_at))
                    .take(remaining),
            );

            match page.cursor {
                Some(next) if page_len > 0 => cursor = Some(next),
                _ => break,
            }
        }

        Ok(posts)
    }

    /// Searches the first few [`SEARCH_TERMS`] until `count` topical,
    /// non-reply posts with distinct URIs are found.
    ///
    /// A failing term is logged and skipped; only the posts found so far are
    /// returned.
    pub async fn search_topic_posts(
        &self,
        count: usize,
        filter: &TopicFilter,
    ) -> Vec<CollectedPost> {
        let mut collected = Vec::new();
        self.collect_topic_posts(count, filter, &mut collected).await;
        collected
    }

    /// Like [`SearchClient::search_topic_posts`], but appends to `collected`
    /// as each term completes, so a caller that drops this future early
    /// keeps every post found up to that point.
    pub async fn collect_topic_posts(
        &self,
        count: usize,
        filter: &TopicFilter,
        collected: &mut Vec<CollectedPost>,
    ) {
        let per_term = (count * 2).min(MAX_PER_TERM);
        let mut seen: HashSet<String> =
            collected.iter().map(|c| c.post.uri.clone()).collect();

        for term in SEARCH_TERMS.iter().take(TERMS_PER_SEARCH) {
            if collected.len() >= count {
                break;
            }
            let results = match self.search(term, per_term).await {
                Ok(results) => results,
                Err(err) => {
                    warn!("search for {term:?} failed: {err}");
                    continue;
                }
            };
            for post in results {
                if collected.len() >= count {
                    break;
                }
                if post.is_reply
                    || !filter.matches(&post.text)
                    || !seen.insert(post.uri.clone())
                {
                    continue;
                }
                let ordinal = collected.len() + 1;
                info!("found stock post {ordinal}/{count} via search for {term:?}");
                collected.push(CollectedPost { ordinal, post });
            }
        }
    }
}
