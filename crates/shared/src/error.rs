use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the backend on failed requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.error
            .or(self.message)
            .filter(|message| !message.trim().is_empty())
    }
}

/// Extracts the human-readable message from a raw error response body.
pub fn server_error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.into_message() {
            return message;
        }
    }
    body.trim().to_string()
}

#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("expected a `{resource}` list, got {found}")]
    UnexpectedShape {
        resource: &'static str,
        found: &'static str,
    },
    #[error("server reported failure: {0}")]
    Rejected(String),
    #[error("malformed `{resource}` entry: {source}")]
    Entry {
        resource: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
