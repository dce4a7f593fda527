use skypulse_protocol::AnalyzedPost;
use skypulse_protocol::SentimentLabel;

/// Aggregate figures over a batch of analyzed posts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentReport {
    pub total: usize,
    pub positive: usize,
    pub negative: usize,
    /// Mean confidence in `[0, 1]`; zero for an empty batch.
    pub average_confidence: f32,
}

impl SentimentReport {
    pub fn from_posts(posts: &[AnalyzedPost]) -> Self {
        let total = posts.len();
        let positive = posts
            .iter()
            .filter(|post| post.sentiment.label == SentimentLabel::Positive)
            .count();
        let confidence_sum: f32 = posts.iter().map(|post| post.sentiment.confidence).sum();
        let average_confidence = if total == 0 {
            0.0
        } else {
            confidence_sum / total as f32
        };
        Self {
            total,
            positive,
            negative: total - positive,
            average_confidence,
        }
    }

    pub fn positive_percent(&self) -> f64 {
        percent(self.positive, self.total)
    }

    pub fn negative_percent(&self) -> f64 {
        percent(self.negative, self.total)
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use skypulse_protocol::CandidatePost;
    use skypulse_protocol::CollectedPost;
    use skypulse_protocol::Sentiment;

    fn analyzed(label: SentimentLabel, confidence: f32) -> AnalyzedPost {
        AnalyzedPost {
            post: CollectedPost {
                ordinal: 1,
                post: CandidatePost::new("stocks", "did:plc:x", "at://x", Utc::now()),
            },
            sentiment: Sentiment::new(label, confidence),
        }
    }

    #[test]
    fn counts_labels_and_averages_confidence() {
        let report = SentimentReport::from_posts(&[
            analyzed(SentimentLabel::Positive, 0.5),
            analyzed(SentimentLabel::Negative, 1.0),
            analyzed(SentimentLabel::Positive, 0.75),
            analyzed(SentimentLabel::Positive, 0.25),
        ]);

        assert_eq!(report.total, 4);
        assert_eq!(report.positive, 3);
        assert_eq!(report.negative, 1);
        assert_eq!(report.average_confidence, 0.625);
        assert_eq!(report.positive_percent(), 75.0);
        assert_eq!(report.negative_percent(), 25.0);
    }

    #[test]
    fn empty_batch_is_all_zero() {
        let report = SentimentReport::from_posts(&[]);
        assert_eq!(report.total, 0);
        assert_eq!(report.average_confidence, 0.0);
        assert_eq!(report.positive_percent(), 0.0);
    }
}
