use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed input, detected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// A collaborator could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// A collaborator answered with `success = false`.
    #[error("{0}")]
    SourceRejected(String),

    #[error("manual selection required for {} group(s): {}", group_ids.len(), group_ids.join(", "))]
    ManualSelectionRequired { group_ids: Vec<String> },

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl SyncError {
    /// Whether the failure happened before the collaborator could answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }
}
