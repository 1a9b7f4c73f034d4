use crate::codec::CodecError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// How a failed delivery is classified in the dead-letter table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    HttpError,
    GenericError,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::HttpError => "HTTP_ERROR",
            ErrorKind::GenericError => "GENERIC_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed attempt to hand a payload to the conversion API.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("conversion API responded with status {status}")]
    Http { status: u16, body: String },

    #[error("conversion API request failed")]
    Transport(#[from] reqwest::Error),

    #[error("could not encode payload")]
    Encoding(#[from] CodecError),
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::Http { .. } => ErrorKind::HttpError,
            DeliveryError::Transport(_) | DeliveryError::Encoding(_) => ErrorKind::GenericError,
        }
    }

    /// Response body returned by the conversion API, if it answered at all.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            DeliveryError::Http { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// Errors that can occur while setting up or running the forwarder
#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("invalid downstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Renders an error followed by every error in its `source()` chain.
pub fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str("\ncaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
