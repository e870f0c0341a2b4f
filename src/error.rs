//! Error taxonomy with stable codes and HTTP status mapping.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("idempotency key reused with different request content")]
    IdempotencyConflict,

    #[error("not found: {0}")]
    NotFound(String),

    /// Backstop for the one-debit-one-credit ledger invariant; hitting it
    /// means a code path tried to book the same entry twice.
    #[error("duplicate ledger entry: {0}")]
    DuplicateLedgerEntry(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("database error: {0}")]
    Database(String),
}

impl PayoutError {
    /// Stable machine-readable code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            PayoutError::InvalidArgument(_) => "INVALID_ARGUMENT",
            PayoutError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            PayoutError::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            PayoutError::NotFound(_) => "NOT_FOUND",
            PayoutError::DuplicateLedgerEntry(_) => "DUPLICATE_LEDGER_ENTRY",
            PayoutError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            PayoutError::Database(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            PayoutError::InvalidArgument(_) => 400,
            PayoutError::InsufficientFunds => 422,
            PayoutError::IdempotencyConflict => 409,
            PayoutError::NotFound(_) => 404,
            PayoutError::DuplicateLedgerEntry(_)
            | PayoutError::InvariantViolation(_)
            | PayoutError::Database(_) => 500,
        }
    }
}

impl From<sqlx::Error> for PayoutError {
    fn from(e: sqlx::Error) -> Self {
        PayoutError::Database(e.to_string())
    }
}
