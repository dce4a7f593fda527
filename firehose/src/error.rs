use thiserror::Error;

pub type Result<T> = std::result::Result<T, FirehoseError>;

/// Failures that end, or fail to start, a collection session.
#[derive(Debug, Error)]
pub enum FirehoseError {
    /// The event stream could not be opened at all. This is the only class of
    /// failure that surfaces to callers of [`crate::StreamSession::run`].
    #[error("failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("invalid firehose endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    /// The connection failed after it was established.
    #[error("event stream error: {0}")]
    Stream(String),

    #[error("failed to close event stream: {0}")]
    Close(String),
}

impl FirehoseError {
    pub fn connect(endpoint: &str, message: impl Into<String>) -> Self {
        Self::Connect {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }
}

/// Reasons a single frame could not be turned into a commit. These never end
/// a session; the frame is logged and dropped.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("malformed CBOR: {0}")]
    Cbor(#[from] serde_cbor::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed CAR block section: {0}")]
    Car(#[from] CarError),

    #[error("jetstream commit is missing `{0}`")]
    MissingField(&'static str),

    /// The relay sent an error frame (`op == -1`).
    #[error("relay error frame {error}: {message}")]
    ErrorFrame { error: String, message: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CarError {
    #[error("truncated varint at offset {0}")]
    TruncatedVarint(usize),

    #[error("varint overflows u64 at offset {0}")]
    VarintOverflow(usize),

    #[error("section at offset {offset} claims {len} bytes but only {available} remain")]
    SectionOverrun {
        offset: usize,
        len: usize,
        available: usize,
    },

    #[error("unsupported CID version {0}")]
    UnsupportedCidVersion(u64),

    #[error("CID digest overruns its section at offset {0}")]
    TruncatedCid(usize),
}
