use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("GET {url} failed: {status}; body={body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode search response from {url}: {message}")]
    Decode { url: String, message: String },
}
