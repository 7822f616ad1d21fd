use thiserror::Error;

/// Failure taxonomy for ledger operations.
///
/// Expected conditions (unknown ids, balance guards, terminal payouts) are
/// returned to callers as values; they are never panics. Persistence problems
/// are isolated in the store layer and retried there.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("user {0} is not registered")]
    UserNotFound(i64),

    #[error("payout {0} not found")]
    PayoutNotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("payout below minimum: {minimum} minimum, {requested} requested")]
    BelowMinimumPayout { minimum: i64, requested: i64 },

    #[error("invalid transition: {message}")]
    InvalidTransition { message: String },

    #[error("persistence failure: {message}")]
    Persistence { message: String },
}

impl LedgerError {
    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::InvalidTransition {
            message: message.into(),
        }
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            message: err.to_string(),
        }
    }
}
