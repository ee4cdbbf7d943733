use std::time::Duration;

use shared::error::ShapeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {path} timed out after {after:?}")]
    Timeout { path: String, after: Duration },
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response from {path}: {source}")]
    UnexpectedShape {
        path: String,
        #[source]
        source: ShapeError,
    },
    #[error("malformed response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("server rejected the request: {0}")]
    Rejected(String),
    #[error("not logged in")]
    NotAuthenticated,
    #[error("invalid server url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("websocket connect timed out after {0:?}")]
    SocketTimeout(Duration),
    #[error("websocket failure: {0}")]
    WebSocket(String),
    #[error("realtime channel is closed")]
    ChannelClosed,
    #[error("session store failure: {0}")]
    Store(#[source] anyhow::Error),
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. } | ClientError::SocketTimeout(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn shape(path: &str, source: ShapeError) -> Self {
        match source {
            ShapeError::Rejected(message) => ClientError::Rejected(message),
            source => ClientError::UnexpectedShape {
                path: path.to_string(),
                source,
            },
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(value.to_string())
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
