#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage responded with status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("invalid key {0:?}: keys cannot contain '/', '\\', '#', '?' or control characters")]
    InvalidKey(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
