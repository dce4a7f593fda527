use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use skypulse_protocol::CandidatePost;
use tracing::debug;

use crate::commit::Commit;
use crate::commit::OpAction;
use crate::commit::Operation;
use crate::commit::POST_COLLECTION;
use crate::commit::PostRecord;
use crate::commit::RecordRef;

/// Pulls candidate posts out of decoded commits.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    collection: String,
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new(POST_COLLECTION)
    }
}

impl ContentExtractor {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Yields one candidate per `create` of a non-reply post with text.
    ///
    /// Operations whose record cannot be resolved are skipped individually;
    /// the rest of the commit is still processed.
    pub fn extract<'a>(
        &'a self,
        commit: &'a Commit,
        ingested_at: DateTime<Utc>,
    ) -> impl Iterator<Item = CandidatePost> + 'a {
        commit
            .operations
            .iter()
            .filter(move |op| {
                op.action == OpAction::Create && op.collection() == self.collection
            })
            .filter_map(move |op| candidate_from_op(commit, op, ingested_at))
    }
}

fn candidate_from_op(
    commit: &Commit,
    op: &Operation,
    ingested_at: DateTime<Utc>,
) -> Option<CandidatePost> {
    let record = resolve_record(commit, op)?;
    if record.is_reply() {
        debug!(path = %op.path, "skipping reply");
        return None;
    }
    let text = record.text()?;

    let created_at = record
        .created_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map_or(ingested_at, |parsed| parsed.with_timezone(&Utc));

    Some(CandidatePost::new(
        text,
        commit.repository_id.clone(),
        CandidatePost::record_uri(&commit.repository_id, &op.path),
        created_at,
    ))
}

fn resolve_record(commit: &Commit, op: &Operation) -> Option<PostRecord> {
    match &op.record {
        RecordRef::Inline(value) => match PostRecord::deserialize(value) {
            Ok(record) => Some(record),
            Err(err) => {
                debug!(path = %op.path, "failed to decode inline record: {err}");
                None
            }
        },
        RecordRef::Block(key) => {
            let Some(block) = commit.blocks.get(key) else {
                debug!(path = %op.path, cid = %key, "record block missing from commit");
                return None;
            };
            match serde_cbor::from_slice::<PostRecord>(block) {
                Ok(record) => Some(record),
                Err(err) => {
                    debug!(path = %op.path, "failed to decode record block: {err}");
                    None
                }
            }
        }
        RecordRef::Absent => None,
    }
}
