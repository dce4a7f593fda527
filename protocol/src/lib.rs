//! Data model shared by the skypulse crates: posts flowing out of the
//! firehose or the search fallback, and the sentiment attached to them.

pub mod post;
pub mod sentiment;

pub use post::CandidatePost;
pub use post::CollectedPost;
pub use sentiment::AnalyzedPost;
pub use sentiment::Sentiment;
pub use sentiment::SentimentLabel;
