use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("{operation}: status {status}: {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unexpected response: {0}")]
    Malformed(String),

    #[error("injected failure: {0}")]
    Injected(String),

    #[error("internal directory error: {0}")]
    Internal(String),
}
