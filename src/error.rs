use thiserror::Error;

/// Typed failures surfaced to the callers of the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-range input.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The actor lacks the role or the ownership required.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The operation is not valid from the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A uniqueness or write-once rule would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A domain rule is violated (quota, duplicate scholarship, closed period…).
    #[error("{0}")]
    Business(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Error {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable name of the error kind, as reported to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::Conflict(_) => "CONFLICT",
            Error::Business(_) => "BUSINESS_ERROR",
            Error::Database(_) => "INTERNAL_ERROR",
        }
    }
}

/// True if the database refused a write because of a unique key.
pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(e) if e.is_unique_violation())
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
