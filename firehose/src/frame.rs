//! Turns raw websocket frames into [`Commit`]s.
//!
//! Binary frames follow the `com.atproto.sync.subscribeRepos` event-stream
//! framing: a DAG-CBOR header `{op, t}` immediately followed by a DAG-CBOR
//! body. Text frames are Jetstream JSON events.

use serde::Deserialize;
use serde_bytes::ByteBuf;
use tracing::trace;

use crate::car;
use crate::commit::BlockMap;
use crate::commit::Commit;
use crate::commit::Frame;
use crate::commit::OpAction;
use crate::commit::Operation;
use crate::commit::RecordRef;
use crate::error::FrameDecodeError;

const OP_MESSAGE: i64 = 1;
const OP_ERROR: i64 = -1;
const COMMIT_TYPE: &str = "#commit";
const JETSTREAM_COMMIT_KIND: &str = "commit";

#[derive(Debug, Deserialize)]
struct FrameHeader {
    op: i64,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitBody {
    repo: String,
    #[serde(default)]
    seq: Option<i64>,
    #[serde(default)]
    ops: Vec<RepoOpBody>,
    #[serde(default)]
    blocks: Option<ByteBuf>,
}

#[derive(Debug, Deserialize)]
struct RepoOpBody {
    action: String,
    path: String,
    /// DAG-CBOR tag 42. Tags are transparent to serde, so this arrives as the
    /// tagged byte string.
    #[serde(default)]
    cid: Option<ByteBuf>,
}

#[derive(Debug, Deserialize)]
struct JetstreamEvent {
    did: String,
    kind: String,
    #[serde(default)]
    commit: Option<JetstreamCommit>,
}

#[derive(Debug, Deserialize)]
struct JetstreamCommit {
    operation: String,
    collection: String,
    rkey: String,
    #[serde(default)]
    record: Option<serde_json::Value>,
}

/// Decodes one frame.
///
/// `Ok(None)` means the frame is well formed but is not a commit (identity,
/// account and sync events, Jetstream account events, ...) and should be
/// skipped silently.
pub fn decode_frame(frame: &Frame) -> Result<Option<Commit>, FrameDecodeError> {
    match frame {
        Frame::Binary(bytes) => decode_binary(bytes),
        Frame::Text(text) => decode_text(text),
    }
}

fn decode_binary(bytes: &[u8]) -> Result<Option<Commit>, FrameDecodeError> {
    let mut de = serde_cbor::Deserializer::from_slice(bytes);
    let header = FrameHeader::deserialize(&mut de)?;

    match (header.op, header.t.as_deref()) {
        (OP_ERROR, _) => {
            let body = ErrorBody::deserialize(&mut de)?;
            Err(FrameDecodeError::ErrorFrame {
                error: body.error,
                message: body.message.unwrap_or_default(),
            })
        }
        (OP_MESSAGE, Some(COMMIT_TYPE)) => {
            let body = CommitBody::deserialize(&mut de)?;
            de.end()?;
            commit_from_body(body).map(Some)
        }
        (op, t) => {
            trace!("skipping firehose frame op={op} t={t:?}");
            Ok(None)
        }
    }
}

fn commit_from_body(body: CommitBody) -> Result<Commit, FrameDecodeError> {
    let blocks = match body.blocks {
        Some(car_bytes) => car::read_blocks(&car_bytes)?,
        None => BlockMap::new(),
    };
    let operations = body
        .ops
        .into_iter()
        .filter_map(|op| {
            let Some(action) = OpAction::parse(&op.action) else {
                trace!("skipping repo op with action {:?} at {}", op.action, op.path);
                return None;
            };
            let record = match op.cid {
                Some(cid) => RecordRef::Block(car::cid_key(&cid)),
                None => RecordRef::Absent,
            };
            Some(Operation {
                action,
                path: op.path,
                record,
            })
        })
        .collect();

    Ok(Commit {
        repository_id: body.repo,
        operations,
        blocks,
        seq: body.seq,
    })
}

fn decode_text(text: &str) -> Result<Option<Commit>, FrameDecodeError> {
    let event: JetstreamEvent = serde_json::from_str(text)?;
    if event.kind != JETSTREAM_COMMIT_KIND {
        trace!("skipping jetstream event kind={}", event.kind);
        return Ok(None);
    }
    let commit = event
        .commit
        .ok_or(FrameDecodeError::MissingField("commit"))?;
    let Some(action) = OpAction::parse(&commit.operation) else {
        trace!("skipping jetstream operation {:?}", commit.operation);
        return Ok(None);
    };
    let record = match commit.record {
        Some(record) => RecordRef::Inline(record),
        None => RecordRef::Absent,
    };

    Ok(Some(Commit {
        repository_id: event.did,
        operations: vec![Operation {
            action,
            path: format!("{}/{}", commit.collection, commit.rkey),
            record,
        }],
        blocks: BlockMap::new(),
        seq: None,
    }))
}
