use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("aggregate recompute failed: {0}")]
    AggregateRecompute(String),
    #[error("SQLite error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        CoreError::Forbidden(msg.into())
    }

    /// Wire code used in the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::NotFound(_) => "not_found",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::Storage(_) => "storage_error",
            CoreError::AggregateRecompute(_) | CoreError::Db(_) | CoreError::Io(_) => {
                "internal_error"
            }
        }
    }

    /// Message safe to hand back to the caller. Internal failures are masked.
    pub fn public_message(&self) -> String {
        match self {
            CoreError::Validation(m) | CoreError::NotFound(m) | CoreError::Forbidden(m) => {
                m.clone()
            }
            CoreError::Storage(_) => "attachment storage failed".to_string(),
            _ => "internal error".to_string(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
