//! Settlement collaborator seam.
//!
//! The counterparty exposes a single transfer operation that fails in
//! exactly one of three classified ways. Implementations must map any
//! unclassifiable error onto `Permanent` (fail-closed): an error the
//! orchestrator cannot classify is never silently retried.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::types::Currency;

pub use http::HttpSettlementApi;
pub use mock::MockSettlementApi;

/// Classified settlement failure.
#[derive(Error, Debug, Clone)]
pub enum SettlementError {
    /// The call did not resolve in time; outcome unknown, retryable.
    #[error("settlement call timed out")]
    Timeout,

    /// The counterparty reported a transient condition; retryable.
    #[error("temporary settlement failure: {0}")]
    Temporary(String),

    /// The counterparty rejected the transfer; terminal.
    #[error("permanent settlement failure: {0}")]
    Permanent(String),
}

impl SettlementError {
    /// Retryable failures drive NEEDS_RETRY; permanent ones drive FAILED.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::Timeout | SettlementError::Temporary(_)
        )
    }

    /// Stored failure reason code.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SettlementError::Timeout => "BANK_TIMEOUT",
            SettlementError::Temporary(_) => "BANK_TEMPORARY_FAILURE",
            SettlementError::Permanent(_) => "BANK_PERMANENT_FAILURE",
        }
    }
}

/// Transfer instruction sent to the counterparty.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SettlementTransfer {
    pub payout_id: Uuid,
    pub merchant_id: String,
    pub amount: Decimal,
    pub currency: Currency,
}

/// Confirmation returned on success.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SettlementReceipt {
    pub external_reference: String,
}

/// The single operation the payout core consumes from its settlement
/// counterparty. Production and test implementations are interchangeable.
#[async_trait]
pub trait SettlementApi: Send + Sync {
    async fn transfer(
        &self,
        req: &SettlementTransfer,
    ) -> Result<SettlementReceipt, SettlementError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SettlementError::Timeout.is_retryable());
        assert!(SettlementError::Temporary("overloaded".into()).is_retryable());
        assert!(!SettlementError::Permanent("account closed".into()).is_retryable());
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(SettlementError::Timeout.reason_code(), "BANK_TIMEOUT");
        assert_eq!(
            SettlementError::Temporary("x".into()).reason_code(),
            "BANK_TEMPORARY_FAILURE"
        );
        assert_eq!(
            SettlementError::Permanent("x".into()).reason_code(),
            "BANK_PERMANENT_FAILURE"
        );
    }
}
