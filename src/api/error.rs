use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("HTTP error: status {status}{}", format_detail(.detail))]
    Http {
        status: u16,
        detail: Option<String>,
    },

    #[error("Response body is empty")]
    EmptyBody,

    #[error("Connection interrupted: {0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Stream ended without a complete trip plan")]
    IncompleteStream,

    #[error("{0}")]
    Backend(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Cancellation is not a failure from the user's point of view.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Http { status: 401, .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ClientError::Http {
                status: status.as_u16(),
                detail: None,
            }
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

impl From<crate::store::StorageError> for ClientError {
    fn from(e: crate::store::StorageError) -> Self {
        ClientError::Storage(e.to_string())
    }
}

fn format_detail(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(" ({})", d))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, ClientError>;
