use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use skypulse_protocol::AnalyzedPost;
use skypulse_protocol::CollectedPost;
use skypulse_protocol::Sentiment;
use tracing::warn;

use crate::error::ScoreError;

/// Maps a piece of text to a sentiment label and confidence.
#[async_trait]
pub trait SentimentScorer: Send + Sync {
    async fn score(&self, text: &str) -> Result<Sentiment, ScoreError>;
}

/// Scores everything as the neutral default. Used when no model backend is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralScorer;

#[async_trait]
impl SentimentScorer for NeutralScorer {
    async fn score(&self, _text: &str) -> Result<Sentiment, ScoreError> {
        Ok(Sentiment::neutral())
    }
}

/// Scores `text`, substituting [`Sentiment::neutral`] when the scorer fails.
pub async fn score_or_neutral(scorer: &dyn SentimentScorer, text: &str) -> Sentiment {
    match scorer.score(text).await {
        Ok(sentiment) => sentiment,
        Err(err) => {
            warn!("sentiment scoring failed, using neutral default: {err}");
            Sentiment::neutral()
        }
    }
}

/// Scores `posts` with at most `concurrency` requests in flight. The result
/// keeps the input order.
pub async fn score_posts(
    scorer: &dyn SentimentScorer,
    posts: Vec<CollectedPost>,
    concurrency: usize,
) -> Vec<AnalyzedPost> {
    let mut scored: Vec<(usize, AnalyzedPost)> = stream::iter(posts.into_iter().enumerate())
        .map(|(index, post)| async move {
            let sentiment = score_or_neutral(scorer, &post.post.text).await;
            (index, AnalyzedPost { post, sentiment })
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    scored.sort_by_key(|(index, _)| *index);
    scored.into_iter().map(|(_, post)| post).collect()
}
