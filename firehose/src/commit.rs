use std::collections::HashMap;

use serde::Deserialize;
use serde::de::IgnoredAny;

/// Collection NSID of Bluesky posts.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// One discrete message delivered over the stream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// DAG-CBOR header + body, as sent by `com.atproto.sync.subscribeRepos`.
    Binary(bytes::Bytes),
    /// A JSON document, as sent by Jetstream.
    Text(String),
}

/// Content-identifier key → raw DAG-CBOR block.
///
/// Keys are the lowercase hex of the binary CID, without the multibase
/// prefix byte.
pub type BlockMap = HashMap<String, Vec<u8>>;

/// One repository mutation event.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub repository_id: String,
    pub operations: Vec<Operation>,
    pub blocks: BlockMap,
    pub seq: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpAction {
    Create,
    Update,
    Delete,
}

impl OpAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub action: OpAction,
    /// `<collection>/<rkey>`.
    pub path: String,
    pub record: RecordRef,
}

impl Operation {
    pub fn collection(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }
}

/// Where the record body of an operation lives.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordRef {
    /// Embedded directly in the operation (Jetstream).
    Inline(serde_json::Value),
    /// Stored in the commit's [`BlockMap`] under this key.
    Block(String),
    /// Deletes carry no record.
    Absent,
}

/// The fields of an `app.bsky.feed.post` record that collection cares about.
/// Works for both the DAG-CBOR and JSON encodings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub reply: Option<IgnoredAny>,
}

impl PostRecord {
    pub fn is_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// The post text, if present and not blank.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn collection_is_first_path_segment() {
        let op = Operation {
            action: OpAction::Create,
            path: "app.bsky.feed.post/3kabc".to_string(),
            record: RecordRef::Absent,
        };
        assert_eq!(op.collection(), POST_COLLECTION);
    }

    #[test]
    fn post_record_detects_replies_and_blank_text() {
        let record: PostRecord = serde_json::from_value(json!({
            "$type": "app.bsky.feed.post",
            "text": "   ",
            "reply": {"root": {"uri": "at://x", "cid": "y"}, "parent": {"uri": "at://x", "cid": "y"}}
        }))
        .unwrap();
        assert!(record.is_reply());
        assert_eq!(record.text(), None);
    }
}
