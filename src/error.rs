use std::io;
use thiserror::Error;

// --- Error Handling ---
// Every failure in the client is recoverable; the UI reports it and waits for the next action.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network Error: {0}")]
    Network(String),
    #[error("HTTP Error {status}: {reason}")]
    Http { status: u16, reason: String },
    #[error("Stream Error: {0}")]
    StreamProtocol(String),
    #[error("A response is already streaming")]
    ConcurrentStream,
    #[error("Conversation history is still loading")]
    HistoryLoading,
    #[error("No response is streaming")]
    NoActiveStream,
    #[error("No connection to the server. Check the configuration.")]
    NotConnected,
    #[error("Storage Error: {0}")]
    Persistence(String),
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Command(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => AppError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            },
            None if err.is_decode() => AppError::Network(format!("Failed to decode response: {}", err)),
            None => AppError::Network(err.to_string()),
        }
    }
}

impl AppError {
    /// Errors that end a send and should put the input back in the user's hands.
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            AppError::Network(_) | AppError::Http { .. } | AppError::StreamProtocol(_) | AppError::Json(_)
        )
    }
}
