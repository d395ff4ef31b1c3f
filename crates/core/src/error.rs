use thiserror::Error;

use crate::content::validate::ValidationError;

/// Failure inside a [`WorkflowStore`](crate::store::WorkflowStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Injected by test doubles.
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Errors returned by workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Page or revision missing, or the revision belongs to another page.
    #[error("{0} not found")]
    NotFound(String),

    /// A transition guard was violated. Never retried.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Input failed field validation.
    #[error("validation failed")]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidTransition(reason.into())
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
