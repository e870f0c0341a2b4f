//! Audit redaction policy.
//!
//! Each event type carries a fixed, ordered field allow-list. Anything not
//! on the list is dropped; anything on the banned-secret list is dropped
//! even if allow-listed. Identifiers that must never be audited in clear
//! (idempotency keys, external settlement references) are hashed by the
//! caller before entering the context map.

use std::fmt;

use serde_json::{Map, Value};

/// Field names that must never reach the audit trail, regardless of
/// allow-lists. Matched case-insensitively.
const BANNED_KEYS: &[&str] = &[
    "cardnumber",
    "pan",
    "cvv",
    "cvc",
    "pin",
    "accountnumber",
    "routingnumber",
    "iban",
    "password",
    "secret",
    "token",
    "accesstoken",
    "refreshtoken",
    "authorization",
    "headers",
];

/// The audit event catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventType {
    RequestAccepted,
    IdempotentReplay,
    WalletDebited,
    BankCallStarted,
    BankCallSucceeded,
    BankCallTimeout,
    BankCallTemporaryFailure,
    PayoutFailedPermanent,
    PayoutMarkedRetry,
    WalletCreditedCompensation,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::RequestAccepted => "REQUEST_ACCEPTED",
            AuditEventType::IdempotentReplay => "IDEMPOTENT_REPLAY",
            AuditEventType::WalletDebited => "WALLET_DEBITED",
            AuditEventType::BankCallStarted => "BANK_CALL_STARTED",
            AuditEventType::BankCallSucceeded => "BANK_CALL_SUCCEEDED",
            AuditEventType::BankCallTimeout => "BANK_CALL_TIMEOUT",
            AuditEventType::BankCallTemporaryFailure => "BANK_CALL_TEMPORARY_FAILURE",
            AuditEventType::PayoutFailedPermanent => "PAYOUT_FAILED_PERMANENT",
            AuditEventType::PayoutMarkedRetry => "PAYOUT_MARKED_RETRY",
            AuditEventType::WalletCreditedCompensation => "WALLET_CREDITED_COMPENSATION",
        }
    }

    /// Ordered field allow-list for this event type.
    pub fn allowed_fields(&self) -> &'static [&'static str] {
        match self {
            AuditEventType::RequestAccepted => {
                &["merchant_id", "amount", "currency", "idempotency_key_hash"]
            }
            AuditEventType::IdempotentReplay => &["merchant_id", "payout_id", "status"],
            AuditEventType::WalletDebited => {
                &["merchant_id", "wallet_id", "payout_id", "amount", "currency"]
            }
            AuditEventType::BankCallStarted => &["payout_id"],
            AuditEventType::BankCallSucceeded => &["payout_id", "external_reference_hash"],
            AuditEventType::BankCallTimeout => &["payout_id"],
            AuditEventType::BankCallTemporaryFailure => &["payout_id", "error_code"],
            AuditEventType::PayoutFailedPermanent => &["payout_id", "reason_code"],
            AuditEventType::PayoutMarkedRetry => &["payout_id", "attempt_count", "next_retry_at"],
            AuditEventType::WalletCreditedCompensation => {
                &["merchant_id", "wallet_id", "payout_id", "amount", "currency"]
            }
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn is_banned(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    BANNED_KEYS.contains(&lowered.as_str())
}

/// Copy allow-listed, non-banned fields from the raw context, in allow-list
/// order, dropping absent fields silently.
pub fn build_payload(event_type: AuditEventType, input: &Map<String, Value>) -> Map<String, Value> {
    project(event_type.allowed_fields(), input)
}

fn project(allowed: &[&str], input: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for key in allowed {
        if is_banned(key) {
            continue;
        }
        if let Some(value) = input.get(*key) {
            out.insert((*key).to_string(), value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_request_accepted_drops_extra_fields() {
        let context = as_map(json!({
            "merchant_id": "m-1",
            "amount": 40,
            "currency": "NGN",
            "idempotency_key_hash": "abc123",
            "password": "hunter2",
            "internal_note": "should not appear"
        }));

        let payload = build_payload(AuditEventType::RequestAccepted, &context);

        assert_eq!(payload.get("merchant_id"), Some(&json!("m-1")));
        assert_eq!(payload.get("idempotency_key_hash"), Some(&json!("abc123")));
        assert!(payload.get("password").is_none());
        assert!(payload.get("internal_note").is_none());
    }

    #[test]
    fn test_banned_key_dropped_even_if_allowlisted() {
        // A mistakenly allow-listed secret field must still be filtered
        let context = as_map(json!({
            "payout_id": "p-1",
            "password": "hunter2",
            "Authorization": "Bearer xyz"
        }));

        let payload = project(&["payout_id", "password", "Authorization"], &context);

        assert_eq!(payload.get("payout_id"), Some(&json!("p-1")));
        assert!(payload.get("password").is_none());
        assert!(payload.get("Authorization").is_none());
    }

    #[test]
    fn test_absent_fields_dropped_silently() {
        let context = as_map(json!({ "payout_id": "p-1" }));
        let payload = build_payload(AuditEventType::BankCallSucceeded, &context);
        assert_eq!(payload.len(), 1);
        assert!(payload.get("external_reference_hash").is_none());
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(AuditEventType::RequestAccepted.as_str(), "REQUEST_ACCEPTED");
        assert_eq!(
            AuditEventType::WalletCreditedCompensation.as_str(),
            "WALLET_CREDITED_COMPENSATION"
        );
    }
}
