//! Keyword search over the public Bluesky AppView, used when the live
//! firehose is not wanted.

mod client;
mod error;
pub mod types;

pub use client::DEFAULT_SEARCH_BASE_URL;
pub use client::SEARCH_TERMS;
pub use client::SearchClient;
pub use error::SearchError;
