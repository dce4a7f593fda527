use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("sentiment request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sentiment endpoint returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to decode sentiment response: {0}")]
    Decode(String),

    #[error("sentiment API reported failure: {0}")]
    Api(String),

    #[error("sentiment response contained no labels")]
    EmptyResult,

    #[error("unknown sentiment label `{0}`")]
    UnknownLabel(String),

    #[error("sentiment scorer is not configured: {0}")]
    NotConfigured(&'static str),
}
