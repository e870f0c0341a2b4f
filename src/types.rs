//! Core domain types.
//!
//! Status enums map to SMALLINT ids in PostgreSQL; negative ids are
//! terminal-failure states so `status < 0` reads naturally in SQL.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Supported payout currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ngn,
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Ngn => "NGN",
            Currency::Usd => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NGN" => Ok(Currency::Ngn),
            "USD" => Ok(Currency::Usd),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payout lifecycle.
///
/// `PENDING -> SUCCESS | NEEDS_RETRY | FAILED`
/// `NEEDS_RETRY -> SUCCESS | NEEDS_RETRY | FAILED`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutStatus {
    Pending,
    NeedsRetry,
    Success,
    Failed,
}

impl PayoutStatus {
    pub fn id(&self) -> i16 {
        match self {
            PayoutStatus::Pending => 0,
            PayoutStatus::NeedsRetry => 10,
            PayoutStatus::Success => 20,
            PayoutStatus::Failed => -10,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PayoutStatus::Pending),
            10 => Some(PayoutStatus::NeedsRetry),
            20 => Some(PayoutStatus::Success),
            -10 => Some(PayoutStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "PENDING",
            PayoutStatus::NeedsRetry => "NEEDS_RETRY",
            PayoutStatus::Success => "SUCCESS",
            PayoutStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Success | PayoutStatus::Failed)
    }
}

/// Idempotency envelope lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Created,
    InProgress,
    Completed,
    FailedFinal,
}

impl RequestStatus {
    pub fn id(&self) -> i16 {
        match self {
            RequestStatus::Created => 0,
            RequestStatus::InProgress => 10,
            RequestStatus::Completed => 20,
            RequestStatus::FailedFinal => -10,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(RequestStatus::Created),
            10 => Some(RequestStatus::InProgress),
            20 => Some(RequestStatus::Completed),
            -10 => Some(RequestStatus::FailedFinal),
            _ => None,
        }
    }
}

/// Ledger entry direction. A payout gets at most one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn id(&self) -> i16 {
        match self {
            EntryType::Debit => 1,
            EntryType::Credit => 2,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(EntryType::Debit),
            2 => Some(EntryType::Credit),
            _ => None,
        }
    }
}

/// Inbound payout request, already currency-validated.
#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub merchant_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub idempotency_key: String,
}

impl PayoutRequest {
    /// Semantic fingerprint of the request. Two submissions under the same
    /// idempotency key must hash identically to count as a replay; amount is
    /// normalized to two decimal places so `150` and `150.00` agree.
    pub fn content_hash(&self) -> String {
        sha256_hex(&format!(
            "{}|{:.2}|{}",
            self.merchant_id, self.amount, self.currency
        ))
    }
}

/// Client-facing payout outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutOutcome {
    Success,
    Failed,
    Pending,
}

/// Client-facing projection of a payout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutResult {
    pub payout_id: Uuid,
    pub status: PayoutOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Merchant wallet row.
#[derive(Debug, Clone)]
pub struct WalletRecord {
    pub id: Uuid,
    pub merchant_id: String,
    pub currency: Currency,
    pub balance_available: Decimal,
}

/// Payout row.
#[derive(Debug, Clone)]
pub struct PayoutRecord {
    pub id: Uuid,
    pub merchant_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: PayoutStatus,
    pub failure_reason: Option<String>,
    pub external_reference: Option<String>,
    pub attempt_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutRecord {
    /// Collapse internal states into the three outcomes clients see.
    /// NEEDS_RETRY is in-flight from the caller's point of view.
    pub fn to_result(&self) -> PayoutResult {
        let (status, reason) = match self.status {
            PayoutStatus::Success => (PayoutOutcome::Success, None),
            PayoutStatus::Failed => (PayoutOutcome::Failed, self.failure_reason.clone()),
            PayoutStatus::Pending | PayoutStatus::NeedsRetry => (PayoutOutcome::Pending, None),
        };
        PayoutResult {
            payout_id: self.id,
            status,
            reason,
        }
    }
}

/// Idempotency envelope row.
#[derive(Debug, Clone)]
pub struct PayoutRequestRecord {
    pub id: Uuid,
    pub merchant_id: String,
    pub idempotency_key: String,
    pub request_hash: String,
    pub payout_id: Option<Uuid>,
    pub status: RequestStatus,
}

/// Lowercase hex SHA-256, used for request fingerprints and for hashing
/// sensitive identifiers before they reach the audit trail.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_roundtrip() {
        assert_eq!("NGN".parse::<Currency>(), Ok(Currency::Ngn));
        assert_eq!("USD".parse::<Currency>(), Ok(Currency::Usd));
        assert_eq!(Currency::Ngn.as_str(), "NGN");
        assert!("EUR".parse::<Currency>().is_err());
        assert!("ngn".parse::<Currency>().is_err());
    }

    #[test]
    fn test_payout_status_id_roundtrip() {
        for status in [
            PayoutStatus::Pending,
            PayoutStatus::NeedsRetry,
            PayoutStatus::Success,
            PayoutStatus::Failed,
        ] {
            assert_eq!(PayoutStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(PayoutStatus::from_id(99), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(PayoutStatus::Success.is_terminal());
        assert!(PayoutStatus::Failed.is_terminal());
        assert!(!PayoutStatus::Pending.is_terminal());
        assert!(!PayoutStatus::NeedsRetry.is_terminal());
    }

    #[test]
    fn test_content_hash_stable() {
        let req = PayoutRequest {
            merchant_id: "m-1".to_string(),
            amount: Decimal::new(15_000, 2),
            currency: Currency::Ngn,
            idempotency_key: "key-1".to_string(),
        };
        assert_eq!(req.content_hash(), sha256_hex("m-1|150.00|NGN"));
    }

    #[test]
    fn test_content_hash_normalizes_scale() {
        let whole = PayoutRequest {
            merchant_id: "m-1".to_string(),
            amount: Decimal::from(150),
            currency: Currency::Ngn,
            idempotency_key: "key-1".to_string(),
        };
        let scaled = PayoutRequest {
            amount: Decimal::new(15_000, 2),
            ..whole.clone()
        };
        assert_eq!(whole.content_hash(), scaled.content_hash());
    }

    #[test]
    fn test_content_hash_ignores_idempotency_key() {
        let a = PayoutRequest {
            merchant_id: "m-1".to_string(),
            amount: Decimal::from(150),
            currency: Currency::Ngn,
            idempotency_key: "key-1".to_string(),
        };
        let b = PayoutRequest {
            idempotency_key: "key-2".to_string(),
            ..a.clone()
        };
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_to_result_projection() {
        let mut record = PayoutRecord {
            id: Uuid::new_v4(),
            merchant_id: "m-1".to_string(),
            amount: Decimal::from(10),
            currency: Currency::Usd,
            status: PayoutStatus::NeedsRetry,
            failure_reason: Some("BANK_TIMEOUT".to_string()),
            external_reference: None,
            attempt_count: 2,
            next_retry_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let result = record.to_result();
        assert_eq!(result.status, PayoutOutcome::Pending);
        assert_eq!(result.reason, None);

        record.status = PayoutStatus::Failed;
        let result = record.to_result();
        assert_eq!(result.status, PayoutOutcome::Failed);
        assert_eq!(result.reason.as_deref(), Some("BANK_TIMEOUT"));

        record.status = PayoutStatus::Success;
        assert_eq!(record.to_result().status, PayoutOutcome::Success);
    }

    #[test]
    fn test_result_serialization_omits_empty_reason() {
        let result = PayoutResult {
            payout_id: Uuid::nil(),
            status: PayoutOutcome::Success,
            reason: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"SUCCESS\""));
        assert!(!json.contains("reason"));
    }
}
