//! Bounded collection of topical posts from the Bluesky event stream.
//!
//! The pipeline is `frame` (decode) → `extract` (candidate posts) →
//! `collector` (topic filter, dedup, target count), driven by a
//! [`StreamSession`] that owns the connection and the deadline.

mod car;
mod collector;
mod commit;
mod error;
mod extract;
mod frame;
mod session;
mod topic;
mod websocket;

pub use car::cid_key;
pub use car::read_blocks;
pub use collector::BoundedCollector;
pub use collector::OfferOutcome;
pub use commit::BlockMap;
pub use commit::Commit;
pub use commit::Frame;
pub use commit::OpAction;
pub use commit::Operation;
pub use commit::POST_COLLECTION;
pub use commit::PostRecord;
pub use commit::RecordRef;
pub use error::CarError;
pub use error::FirehoseError;
pub use error::FrameDecodeError;
pub use error::Result;
pub use extract::ContentExtractor;
pub use frame::decode_frame;
pub use session::CollectionOutcome;
pub use session::CompletionLatch;
pub use session::CompletionTrigger;
pub use session::DEFAULT_DEADLINE;
pub use session::DEFAULT_FIREHOSE_ENDPOINT;
pub use session::DEFAULT_JETSTREAM_ENDPOINT;
pub use session::DEFAULT_TARGET_COUNT;
pub use session::FirehoseConfig;
pub use session::FrameStream;
pub use session::SessionState;
pub use session::SessionStats;
pub use session::StreamConnector;
pub use session::StreamSession;
pub use topic::STOCK_MARKET_TERMS;
pub use topic::TopicFilter;
pub use websocket::WebsocketConnector;
pub use websocket::WebsocketFrameStream;
pub use websocket::ensure_rustls_crypto_provider;
