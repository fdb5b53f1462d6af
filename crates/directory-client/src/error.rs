//! Directory client errors

use thiserror::Error;

pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The request never got a response (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The directory answered with a non-success status
    #[error("Directory rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body was not the expected JSON
    #[error("Failed to decode directory response: {0}")]
    Decode(String),

    /// The token is missing, unusable as a header, or its payload is unreadable
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DirectoryError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken(message.into())
    }

    /// Authentication problems the user must fix by signing in again
    pub fn is_auth_failure(&self) -> bool {
        match self {
            DirectoryError::InvalidToken(_) => true,
            DirectoryError::Rejected { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }
}
