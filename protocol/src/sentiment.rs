use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::post::CollectedPost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentimentLabel {
    Positive,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SentimentLabel::Positive => "POSITIVE",
            SentimentLabel::Negative => "NEGATIVE",
        }
    }
}

impl std::fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a sentiment scorer. `confidence` is always within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub confidence: f32,
}

impl Sentiment {
    pub const NEUTRAL_CONFIDENCE: f32 = 0.5;

    /// Clamps `confidence` into `[0, 1]`; NaN becomes the neutral confidence.
    pub fn new(label: SentimentLabel, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            Self::NEUTRAL_CONFIDENCE
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self { label, confidence }
    }

    /// Substituted whenever scoring fails.
    pub fn neutral() -> Self {
        Self {
            label: SentimentLabel::Positive,
            confidence: Self::NEUTRAL_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedPost {
    #[serde(flatten)]
    pub post: CollectedPost,
    pub sentiment: Sentiment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn labels_serialize_uppercase() {
        assert_eq!(
            serde_json::to_value(SentimentLabel::Negative).unwrap(),
            serde_json::json!("NEGATIVE")
        );
        let label: SentimentLabel = serde_json::from_str("\"POSITIVE\"").unwrap();
        assert_eq!(label, SentimentLabel::Positive);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(Sentiment::new(SentimentLabel::Positive, 1.7).confidence, 1.0);
        assert_eq!(Sentiment::new(SentimentLabel::Negative, -0.2).confidence, 0.0);
        assert_eq!(
            Sentiment::new(SentimentLabel::Negative, f32::NAN).confidence,
            Sentiment::NEUTRAL_CONFIDENCE
        );
    }
}
