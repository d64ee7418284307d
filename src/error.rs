//! Ошибки API клиента

use thiserror::Error;

/// Категория ошибки, которую видит вызывающий код
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Http,
    Auth,
    Decode,
    Storage,
}

/// Ошибка вызова API.
/// `Clone`: одна ошибка refresh доставляется всем запросам из очереди.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Network failure or timeout, never retried
    #[error("Network: {0}")]
    Transport(String),

    /// Non-2xx response other than 401
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// 401 that could not be resolved via refresh
    #[error("Auth: {0}")]
    Auth(String),

    /// 2xx body that does not match the expected type
    #[error("Decode: {0}")]
    Decode(String),

    /// Credential store read/write failure
    #[error("Storage: {0}")]
    Storage(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Transport(_) => ErrorKind::Transport,
            ApiError::Http { .. } => ErrorKind::Http,
            ApiError::Auth(_) => ErrorKind::Auth,
            ApiError::Decode(_) => ErrorKind::Decode,
            ApiError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn is_auth(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Transport(format!("request timed out: {}", e))
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Storage(e.to_string())
    }
}
