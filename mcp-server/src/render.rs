use std::fmt::Write as _;
use std::time::Duration;

use skypulse_protocol::AnalyzedPost;
use skypulse_sentiment::SentimentReport;

use crate::tool_config::CollectionSource;

pub const NO_POSTS_MESSAGE: &str = "No stock-related posts found in the time window. The Bluesky firehose may be slow, or stock activity is low. Try increasing the timeout or try again later.";

const MAX_TEXT_CHARS: usize = 200;

pub(crate) fn error_message(err: &anyhow::Error) -> String {
    format!("Error analyzing stock posts: {err}")
}

/// Renders the summary and per-post breakdown returned to the client.
pub(crate) fn render_report(
    source: CollectionSource,
    window: Duration,
    posts: &[AnalyzedPost],
) -> String {
    let report = SentimentReport::from_posts(posts);
    let mut out = String::new();

    let _ = writeln!(
        out,
        "**Stock Sentiment Analysis from {}**",
        source.description()
    );
    let _ = writeln!(out, "{}", "=".repeat(55));
    let _ = writeln!(out);
    let _ = writeln!(out, "**Summary:**");
    let _ = writeln!(out, "- Collection Window: {:.1}s", window.as_secs_f64());
    let _ = writeln!(out, "- Total Posts Analyzed: {}", report.total);
    let _ = writeln!(
        out,
        "- Positive Sentiment: {} ({:.1}%)",
        report.positive,
        report.positive_percent()
    );
    let _ = writeln!(
        out,
        "- Negative Sentiment: {} ({:.1}%)",
        report.negative,
        report.negative_percent()
    );
    let _ = writeln!(
        out,
        "- Average Confidence: {:.1}%",
        f64::from(report.average_confidence) * 100.0
    );
    let _ = writeln!(out);
    let _ = write!(out, "**Detailed Posts:**");

    for (i, analyzed) in posts.iter().enumerate() {
        if i > 0 {
            let _ = write!(out, "\n---");
        }
        let post = &analyzed.post.post;
        let _ = write!(
            out,
            "\n\n{}. **{}** ({:.1}% confident)\n   Author: {}\n   Text: \"{}\"\n   Posted: {}\n   URI: {}\n",
            analyzed.post.ordinal,
            analyzed.sentiment.label,
            f64::from(analyzed.sentiment.confidence) * 100.0,
            post.author_display(),
            truncate_text(&post.text),
            post.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            post.uri,
        );
    }

    out.trim().to_string()
}

fn truncate_text(text: &str) -> String {
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use skypulse_protocol::CandidatePost;
    use skypulse_protocol::CollectedPost;
    use skypulse_protocol::Sentiment;
    use skypulse_protocol::SentimentLabel;

    fn analyzed(ordinal: usize, text: &str, label: SentimentLabel, confidence: f32) -> AnalyzedPost {
        let created_at = Utc.with_ymd_and_hms(2025, 3, 4, 15, 30, 0).unwrap();
        let mut post = CandidatePost::new(
            text,
            "did:plc:gail",
            format!("at://did:plc:gail/app.bsky.feed.post/{ordinal}"),
            created_at,
        );
        post.author_label = Some("gail.bsky.social".to_string());
        AnalyzedPost {
            post: CollectedPost { ordinal, post },
            sentiment: Sentiment::new(label, confidence),
        }
    }

    #[test]
    fn renders_summary_and_posts() {
        let posts = vec![
            analyzed(1, "stocks are ripping", SentimentLabel::Positive, 0.75),
            analyzed(2, "market crash incoming", SentimentLabel::Negative, 0.5),
        ];

        let text = render_report(CollectionSource::Firehose, Duration::from_millis(2500), &posts);

        let expected = format!(
            "**Stock Sentiment Analysis from Bluesky Firehose**
{}

**Summary:**
- Collection Window: 2.5s
- Total Posts Analyzed: 2
- Positive Sentiment: 1 (50.0%)
- Negative Sentiment: 1 (50.0%)
- Average Confidence: 62.5%

**Detailed Posts:**

1. **POSITIVE** (75.0% confident)
   Author: gail.bsky.social
   Text: \"stocks are ripping\"
   Posted: 2025-03-04 15:30:00 UTC
   URI: at://did:plc:gail/app.bsky.feed.post/1

---

2. **NEGATIVE** (50.0% confident)
   Author: gail.bsky.social
   Text: \"market crash incoming\"
   Posted: 2025-03-04 15:30:00 UTC
   URI: at://did:plc:gail/app.bsky.feed.post/2",
            "=".repeat(55)
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn long_text_is_truncated_on_char_boundary() {
        let long = "📈".repeat(250);
        let truncated = truncate_text(&long);
        assert_eq!(truncated.chars().count(), MAX_TEXT_CHARS + 3);
        assert!(truncated.ends_with("📈..."));

        let exact = "a".repeat(MAX_TEXT_CHARS);
        assert_eq!(truncate_text(&exact), exact);
    }

    #[test]
    fn error_text_wraps_the_cause() {
        let err = anyhow::anyhow!("connection refused");
        assert_eq!(
            error_message(&err),
            "Error analyzing stock posts: connection refused"
        );
    }
}
