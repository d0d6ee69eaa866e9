use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid vault name pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}
