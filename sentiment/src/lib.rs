//! Sentiment scoring for collected posts.

mod error;
mod report;
mod scorer;
mod workers_ai;

pub use error::ScoreError;
pub use report::SentimentReport;
pub use scorer::NeutralScorer;
pub use scorer::SentimentScorer;
pub use scorer::score_or_neutral;
pub use scorer::score_posts;
pub use workers_ai::DEFAULT_SENTIMENT_MODEL;
pub use workers_ai::DEFAULT_WORKERS_AI_BASE_URL;
pub use workers_ai::WorkersAiConfig;
pub use workers_ai::WorkersAiScorer;
