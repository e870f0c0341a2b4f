//! Payout Orchestrator.
//!
//! Drives the per-payout state machine:
//! `PENDING -> SUCCESS | NEEDS_RETRY | FAILED`, with `NEEDS_RETRY`
//! re-entered by the retry worker. Intake and debit happen in one
//! transaction; the settlement call runs outside any database lock; the
//! outcome is committed in a second transaction.

use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEventType, AuditRecorder, ACTOR_SYSTEM};
use crate::error::PayoutError;
use crate::ledger::{self, NewLedgerEntry};
use crate::settlement::{SettlementApi, SettlementError, SettlementReceipt, SettlementTransfer};
use crate::types::{
    sha256_hex, EntryType, PayoutOutcome, PayoutRecord, PayoutRequest, PayoutResult, RequestStatus,
};

use super::{db, RetryPolicy};

/// Outcome of the intake transaction.
enum Intake {
    /// Known idempotency key with a linked payout: answer from existing
    /// state, no side effects.
    Replay(PayoutRecord),
    /// Fresh debit committed; settlement attempt pending.
    Debited {
        payout: PayoutRecord,
        wallet_id: Uuid,
        request_id: Uuid,
    },
}

pub struct PayoutOrchestrator {
    pool: PgPool,
    settlement: Arc<dyn SettlementApi>,
    audit: AuditRecorder,
    retry_policy: RetryPolicy,
}

impl PayoutOrchestrator {
    pub fn new(
        pool: PgPool,
        settlement: Arc<dyn SettlementApi>,
        audit: AuditRecorder,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            settlement,
            audit,
            retry_policy,
        }
    }

    /// Accept a payout request, debit the wallet, attempt settlement, and
    /// commit the classified outcome. Exactly-once per logical request:
    /// retransmissions of an already-linked key observe a replay.
    pub async fn process_payout(
        &self,
        request: PayoutRequest,
    ) -> Result<PayoutResult, PayoutError> {
        validate(&request)?;

        let request_hash = request.content_hash();
        // Ledger entries correlate back to the caller-supplied key
        let correlation_id = request.idempotency_key.clone();

        let (payout, wallet_id, request_id) =
            match self.intake(&request, &request_hash, &correlation_id).await? {
                Intake::Replay(existing) => return Ok(existing.to_result()),
                Intake::Debited {
                    payout,
                    wallet_id,
                    request_id,
                } => (payout, wallet_id, request_id),
            };

        self.audit
            .write_event(
                "PAYOUT",
                &payout.id.to_string(),
                AuditEventType::BankCallStarted,
                json!({ "payout_id": payout.id }),
                ACTOR_SYSTEM,
            )
            .await;

        let transfer = SettlementTransfer {
            payout_id: payout.id,
            merchant_id: request.merchant_id.clone(),
            amount: request.amount,
            currency: request.currency,
        };

        match self.settlement.transfer(&transfer).await {
            Ok(receipt) => {
                self.commit_success(payout.id, request_id, &receipt).await?;
                Ok(PayoutResult {
                    payout_id: payout.id,
                    status: PayoutOutcome::Success,
                    reason: None,
                })
            }
            Err(error) if error.is_retryable() => {
                self.commit_first_retry(payout.id, &error).await?;
                // Funds stay debited; the caller sees a pending payout
                Ok(PayoutResult {
                    payout_id: payout.id,
                    status: PayoutOutcome::Pending,
                    reason: None,
                })
            }
            Err(error) => {
                let reason = permanent_reason(&error);
                self.commit_permanent_failure(&payout, wallet_id, request_id, &reason, &correlation_id)
                    .await?;
                Ok(PayoutResult {
                    payout_id: payout.id,
                    status: PayoutOutcome::Failed,
                    reason: Some(reason),
                })
            }
        }
    }

    /// Read-only status projection.
    pub async fn get_payout(&self, payout_id: Uuid) -> Result<PayoutResult, PayoutError> {
        let mut conn = self.pool.acquire().await?;
        let payout = db::get_payout(&mut conn, payout_id)
            .await?
            .ok_or_else(|| PayoutError::NotFound(payout_id.to_string()))?;
        Ok(payout.to_result())
    }

    /// Intake transaction: resolve the idempotency envelope, lock the
    /// wallet, debit, and append the debit ledger entry atomically.
    async fn intake(
        &self,
        request: &PayoutRequest,
        request_hash: &str,
        correlation_id: &str,
    ) -> Result<Intake, PayoutError> {
        let mut tx = self.pool.begin().await?;

        let envelope = match db::find_request(
            &mut tx,
            &request.merchant_id,
            &request.idempotency_key,
        )
        .await?
        {
            Some(existing) => existing,
            None => {
                match db::insert_request(
                    &mut tx,
                    &request.merchant_id,
                    &request.idempotency_key,
                    request_hash,
                )
                .await?
                {
                    Some(created) => created,
                    // Lost the unique-insert race: the winner's row must
                    // now be visible; resolve it as replay or conflict
                    None => db::find_request(
                        &mut tx,
                        &request.merchant_id,
                        &request.idempotency_key,
                    )
                    .await?
                    .ok_or_else(|| {
                        PayoutError::InvariantViolation(
                            "payout request missing after insert conflict".to_string(),
                        )
                    })?,
                }
            }
        };

        if envelope.request_hash != request_hash {
            // Same key, different semantic content: reject, no side effect
            return Err(PayoutError::IdempotencyConflict);
        }

        if let Some(linked_payout_id) = envelope.payout_id {
            let existing = db::get_payout(&mut tx, linked_payout_id)
                .await?
                .ok_or_else(|| {
                    PayoutError::InvariantViolation(format!(
                        "payout {} missing for existing idempotency record",
                        linked_payout_id
                    ))
                })?;
            tx.commit().await?;

            info!(
                merchant_id = %request.merchant_id,
                payout_id = %existing.id,
                "Idempotent replay detected"
            );
            self.audit
                .write_event(
                    "PAYOUT",
                    &existing.id.to_string(),
                    AuditEventType::IdempotentReplay,
                    json!({
                        "merchant_id": request.merchant_id,
                        "payout_id": existing.id,
                        "status": existing.status.as_str(),
                    }),
                    ACTOR_SYSTEM,
                )
                .await;

            return Ok(Intake::Replay(existing));
        }

        let wallet =
            ledger::lock_wallet(&mut tx, &request.merchant_id, request.currency).await?;
        if wallet.balance_available < request.amount {
            // Transaction drops here: no payout row, no envelope insert
            return Err(PayoutError::InsufficientFunds);
        }

        let payout =
            db::insert_payout(&mut tx, &request.merchant_id, request.amount, request.currency)
                .await?;
        db::link_payout(&mut tx, envelope.id, payout.id).await?;

        let (before, after) = ledger::adjust_balance(&mut tx, &wallet, -request.amount).await?;
        ledger::append_entry(
            &mut tx,
            NewLedgerEntry {
                wallet_id: wallet.id,
                payout_id: Some(payout.id),
                entry_type: EntryType::Debit,
                amount: request.amount,
                currency: request.currency,
                balance_before: before,
                balance_after: after,
                correlation_id,
            },
        )
        .await?;

        tx.commit().await?;

        // Audit writes acquire their own pool connection; they run only
        // after commit so the intake transaction never holds one connection
        // while waiting for another
        self.audit
            .write_event(
                "PAYOUT_REQUEST",
                &envelope.id.to_string(),
                AuditEventType::RequestAccepted,
                json!({
                    "merchant_id": request.merchant_id,
                    "amount": request.amount,
                    "currency": request.currency.as_str(),
                    "idempotency_key_hash": sha256_hex(&request.idempotency_key),
                }),
                ACTOR_SYSTEM,
            )
            .await;

        info!(
            merchant_id = %request.merchant_id,
            payout_id = %payout.id,
            amount = %request.amount,
            currency = %request.currency,
            "Wallet debited for payout"
        );
        self.audit
            .write_event(
                "WALLET",
                &wallet.id.to_string(),
                AuditEventType::WalletDebited,
                json!({
                    "merchant_id": request.merchant_id,
                    "wallet_id": wallet.id,
                    "payout_id": payout.id,
                    "amount": request.amount,
                    "currency": request.currency.as_str(),
                }),
                ACTOR_SYSTEM,
            )
            .await;

        Ok(Intake::Debited {
            wallet_id: wallet.id,
            request_id: envelope.id,
            payout,
        })
    }

    async fn commit_success(
        &self,
        payout_id: Uuid,
        request_id: Uuid,
        receipt: &SettlementReceipt,
    ) -> Result<(), PayoutError> {
        let mut tx = self.pool.begin().await?;
        db::mark_success(&mut tx, payout_id, &receipt.external_reference).await?;
        db::set_request_status(&mut tx, request_id, RequestStatus::Completed).await?;
        tx.commit().await?;

        info!(payout_id = %payout_id, "Settlement succeeded");
        self.audit
            .write_event(
                "PAYOUT",
                &payout_id.to_string(),
                AuditEventType::BankCallSucceeded,
                json!({
                    "payout_id": payout_id,
                    // External references are never audited in clear
                    "external_reference_hash": sha256_hex(&receipt.external_reference),
                }),
                ACTOR_SYSTEM,
            )
            .await;

        Ok(())
    }

    async fn commit_first_retry(
        &self,
        payout_id: Uuid,
        error: &SettlementError,
    ) -> Result<(), PayoutError> {
        let next_retry_at = self.retry_policy.next_retry_at(1);

        let mut tx = self.pool.begin().await?;
        db::mark_needs_retry(&mut tx, payout_id, 1, next_retry_at, error.reason_code()).await?;
        tx.commit().await?;

        warn!(
            payout_id = %payout_id,
            reason = error.reason_code(),
            next_retry_at = %next_retry_at,
            "Transient settlement failure, payout scheduled for retry"
        );

        let classification_event = match error {
            SettlementError::Timeout => AuditEventType::BankCallTimeout,
            _ => AuditEventType::BankCallTemporaryFailure,
        };
        let error_code = match error {
            SettlementError::Timeout => "TIMEOUT",
            _ => "TEMPORARY",
        };
        self.audit
            .write_event(
                "PAYOUT",
                &payout_id.to_string(),
                classification_event,
                json!({ "payout_id": payout_id, "error_code": error_code }),
                ACTOR_SYSTEM,
            )
            .await;
        self.audit
            .write_event(
                "PAYOUT",
                &payout_id.to_string(),
                AuditEventType::PayoutMarkedRetry,
                json!({
                    "payout_id": payout_id,
                    "attempt_count": 1,
                    "next_retry_at": next_retry_at.to_rfc3339(),
                }),
                ACTOR_SYSTEM,
            )
            .await;

        Ok(())
    }

    async fn commit_permanent_failure(
        &self,
        payout: &PayoutRecord,
        wallet_id: Uuid,
        request_id: Uuid,
        reason: &str,
        correlation_id: &str,
    ) -> Result<(), PayoutError> {
        let mut tx = self.pool.begin().await?;
        db::mark_failed(&mut tx, payout.id, reason).await?;
        db::set_request_status(&mut tx, request_id, RequestStatus::FailedFinal).await?;

        // Re-credit against the wallet's locked current balance, not the
        // balance cached from the intake transaction
        let wallet = ledger::lock_wallet_by_id(&mut tx, wallet_id).await?;
        let (before, after) = ledger::adjust_balance(&mut tx, &wallet, payout.amount).await?;
        ledger::append_entry(
            &mut tx,
            NewLedgerEntry {
                wallet_id: wallet.id,
                payout_id: Some(payout.id),
                entry_type: EntryType::Credit,
                amount: payout.amount,
                currency: payout.currency,
                balance_before: before,
                balance_after: after,
                correlation_id,
            },
        )
        .await?;
        tx.commit().await?;

        warn!(
            payout_id = %payout.id,
            reason = reason,
            "Permanent settlement failure, wallet compensated"
        );
        self.audit
            .write_event(
                "PAYOUT",
                &payout.id.to_string(),
                AuditEventType::PayoutFailedPermanent,
                json!({ "payout_id": payout.id, "reason_code": "BANK_PERMANENT_FAILURE" }),
                ACTOR_SYSTEM,
            )
            .await;
        self.audit
            .write_event(
                "WALLET",
                &wallet.id.to_string(),
                AuditEventType::WalletCreditedCompensation,
                json!({
                    "merchant_id": payout.merchant_id,
                    "wallet_id": wallet.id,
                    "payout_id": payout.id,
                    "amount": payout.amount,
                    "currency": payout.currency.as_str(),
                }),
                ACTOR_SYSTEM,
            )
            .await;

        Ok(())
    }
}

/// Any unclassified settlement error has already been folded into
/// `Permanent` by the collaborator implementation (fail-closed).
fn permanent_reason(error: &SettlementError) -> String {
    match error {
        SettlementError::Permanent(message) => message.clone(),
        _ => "UNKNOWN_BANK_FAILURE".to_string(),
    }
}

fn validate(request: &PayoutRequest) -> Result<(), PayoutError> {
    if request.merchant_id.trim().is_empty() {
        return Err(PayoutError::InvalidArgument(
            "merchant_id is required".to_string(),
        ));
    }
    if request.idempotency_key.trim().is_empty() {
        return Err(PayoutError::InvalidArgument(
            "idempotency_key is required".to_string(),
        ));
    }
    if request.amount <= rust_decimal::Decimal::ZERO {
        return Err(PayoutError::InvalidArgument(
            "amount must be > 0".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;
    use rust_decimal::Decimal;

    fn request(merchant_id: &str, amount: Decimal, idempotency_key: &str) -> PayoutRequest {
        PayoutRequest {
            merchant_id: merchant_id.to_string(),
            amount,
            currency: Currency::Ngn,
            idempotency_key: idempotency_key.to_string(),
        }
    }

    #[test]
    fn test_validate_rejects_blank_merchant() {
        let result = validate(&request("  ", Decimal::from(10), "key-1"));
        assert!(matches!(result, Err(PayoutError::InvalidArgument(_))));
    }

    #[test]
    fn test_validate_rejects_blank_key() {
        let result = validate(&request("m-1", Decimal::from(10), ""));
        assert!(matches!(result, Err(PayoutError::InvalidArgument(_))));
    }

    #[test]
    fn test_validate_rejects_non_positive_amount() {
        assert!(validate(&request("m-1", Decimal::ZERO, "key-1")).is_err());
        assert!(validate(&request("m-1", Decimal::from(-5), "key-1")).is_err());
        assert!(validate(&request("m-1", Decimal::from(1), "key-1")).is_ok());
    }

    #[test]
    fn test_permanent_reason_passthrough() {
        assert_eq!(
            permanent_reason(&SettlementError::Permanent("account closed".into())),
            "account closed"
        );
        assert_eq!(
            permanent_reason(&SettlementError::Timeout),
            "UNKNOWN_BANK_FAILURE"
        );
    }
}
