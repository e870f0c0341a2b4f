//! Background retry scheduler.
//!
//! Polls for NEEDS_RETRY payouts whose due time has passed, claims a batch
//! with `FOR UPDATE SKIP LOCKED`, and re-drives settlement for each one.
//! The claim transaction advances the attempt count and pushes the due time
//! forward before it commits, so no database lock is ever held across the
//! external settlement call; a crash mid-attempt just means the row comes
//! due again later.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::audit::{AuditEventType, AuditRecorder, ACTOR_SYSTEM};
use crate::config::RetryConfig;
use crate::error::PayoutError;
use crate::settlement::{SettlementApi, SettlementError, SettlementTransfer};
use crate::types::{sha256_hex, PayoutRecord, RequestStatus};

use super::{credit_compensation, db, RetryPolicy};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl WorkerConfig {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            batch_size: config.batch_size,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_size: 10,
        }
    }
}

pub struct RetryWorker {
    pool: PgPool,
    settlement: Arc<dyn SettlementApi>,
    audit: AuditRecorder,
    policy: RetryPolicy,
    config: WorkerConfig,
}

impl RetryWorker {
    pub fn new(
        pool: PgPool,
        settlement: Arc<dyn SettlementApi>,
        audit: AuditRecorder,
        policy: RetryPolicy,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pool,
            settlement,
            audit,
            policy,
            config,
        }
    }

    /// Poll forever. A failed sweep is logged and retried on the next tick.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Retry worker started"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(0) => {}
                Ok(count) => info!(count = count, "Retry sweep processed payouts"),
                Err(e) => error!(error = %e, "Retry sweep failed"),
            }
        }
    }

    /// One sweep: claim due payouts, fail out the exhausted ones, and
    /// re-attempt settlement for the rest. Returns how many payouts were
    /// acted on.
    pub async fn run_once(&self) -> Result<usize, PayoutError> {
        let mut tx = self.pool.begin().await?;
        let claimed = db::claim_due(&mut tx, self.config.batch_size).await?;
        if claimed.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let mut exhausted = Vec::new();
        let mut to_attempt = Vec::new();
        for payout in claimed {
            let attempt = payout.attempt_count + 1;
            if attempt > self.policy.max_attempts {
                self.exhaust(&mut tx, &payout).await?;
                exhausted.push(payout);
            } else {
                // Lease: commit the advanced schedule before calling out,
                // so a crash cannot strand the row in a locked state
                db::lease_retry(&mut tx, payout.id, attempt, self.policy.next_retry_at(attempt))
                    .await?;
                to_attempt.push((payout, attempt));
            }
        }
        tx.commit().await?;

        for payout in &exhausted {
            self.audit_exhausted(payout).await;
        }

        let total = exhausted.len() + to_attempt.len();
        // Each payout is settled and committed on its own; one failed
        // outcome commit must not abandon the rest of the batch, whose
        // leases are already burned
        for (payout, attempt) in to_attempt {
            if let Err(e) = self.attempt(&payout, attempt).await {
                error!(
                    payout_id = %payout.id,
                    attempt = attempt,
                    error = %e,
                    "Retry attempt failed, continuing sweep"
                );
            }
        }

        Ok(total)
    }

    async fn attempt(&self, payout: &PayoutRecord, attempt: i32) -> Result<(), PayoutError> {
        info!(
            payout_id = %payout.id,
            attempt = attempt,
            "Re-attempting settlement"
        );
        self.audit
            .write_event(
                "PAYOUT",
                &payout.id.to_string(),
                AuditEventType::BankCallStarted,
                json!({ "payout_id": payout.id, "attempt_count": attempt }),
                ACTOR_SYSTEM,
            )
            .await;

        let transfer = SettlementTransfer {
            payout_id: payout.id,
            merchant_id: payout.merchant_id.clone(),
            amount: payout.amount,
            currency: payout.currency,
        };

        match self.settlement.transfer(&transfer).await {
            Ok(receipt) => {
                let mut tx = self.pool.begin().await?;
                db::mark_success(&mut tx, payout.id, &receipt.external_reference).await?;
                if let Some(request) = db::find_request_by_payout(&mut tx, payout.id).await? {
                    db::set_request_status(&mut tx, request.id, RequestStatus::Completed).await?;
                }
                tx.commit().await?;

                info!(payout_id = %payout.id, attempt = attempt, "Settlement succeeded on retry");
                self.audit
                    .write_event(
                        "PAYOUT",
                        &payout.id.to_string(),
                        AuditEventType::BankCallSucceeded,
                        json!({
                            "payout_id": payout.id,
                            "external_reference_hash": sha256_hex(&receipt.external_reference),
                        }),
                        ACTOR_SYSTEM,
                    )
                    .await;
            }
            Err(error) if error.is_retryable() => {
                // Status is still NEEDS_RETRY and the lease already moved
                // the due time; only the reason needs refreshing
                let mut tx = self.pool.begin().await?;
                db::set_failure_reason(&mut tx, payout.id, error.reason_code()).await?;
                tx.commit().await?;

                warn!(
                    payout_id = %payout.id,
                    attempt = attempt,
                    reason = error.reason_code(),
                    "Transient settlement failure on retry"
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
                        &payout.id.to_string(),
                        classification_event,
                        json!({ "payout_id": payout.id, "error_code": error_code }),
                        ACTOR_SYSTEM,
                    )
                    .await;
                self.audit
                    .write_event(
                        "PAYOUT",
                        &payout.id.to_string(),
                        AuditEventType::PayoutMarkedRetry,
                        json!({ "payout_id": payout.id, "attempt_count": attempt }),
                        ACTOR_SYSTEM,
                    )
                    .await;
            }
            Err(error) => {
                let reason = match &error {
                    SettlementError::Permanent(message) => message.clone(),
                    _ => "UNKNOWN_BANK_FAILURE".to_string(),
                };
                let mut tx = self.pool.begin().await?;
                db::mark_failed(&mut tx, payout.id, &reason).await?;
                let correlation_id = match db::find_request_by_payout(&mut tx, payout.id).await? {
                    Some(request) => {
                        db::set_request_status(&mut tx, request.id, RequestStatus::FailedFinal)
                            .await?;
                        request.idempotency_key
                    }
                    None => payout.id.to_string(),
                };
                let wallet = credit_compensation(&mut tx, payout, &correlation_id).await?;
                tx.commit().await?;

                warn!(
                    payout_id = %payout.id,
                    attempt = attempt,
                    reason = %reason,
                    "Permanent settlement failure on retry, wallet compensated"
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
            }
        }

        Ok(())
    }

    /// Retry budget spent: fail the payout and return the funds, all inside
    /// the caller's claim transaction.
    async fn exhaust(
        &self,
        conn: &mut sqlx::PgConnection,
        payout: &PayoutRecord,
    ) -> Result<(), PayoutError> {
        db::mark_failed(conn, payout.id, "MAX_RETRY_EXCEEDED").await?;
        let correlation_id = match db::find_request_by_payout(conn, payout.id).await? {
            Some(request) => {
                db::set_request_status(conn, request.id, RequestStatus::FailedFinal).await?;
                request.idempotency_key
            }
            None => payout.id.to_string(),
        };
        credit_compensation(conn, payout, &correlation_id).await?;

        warn!(
            payout_id = %payout.id,
            attempt_count = payout.attempt_count,
            "Retry budget exhausted, payout failed and wallet compensated"
        );

        Ok(())
    }

    async fn audit_exhausted(&self, payout: &PayoutRecord) {
        self.audit
            .write_event(
                "PAYOUT",
                &payout.id.to_string(),
                AuditEventType::PayoutFailedPermanent,
                json!({ "payout_id": payout.id, "reason_code": "MAX_RETRY_EXCEEDED" }),
                ACTOR_SYSTEM,
            )
            .await;
        self.audit
            .write_event(
                "PAYOUT",
                &payout.id.to_string(),
                AuditEventType::WalletCreditedCompensation,
                json!({
                    "merchant_id": payout.merchant_id,
                    "payout_id": payout.id,
                    "amount": payout.amount,
                    "currency": payout.currency.as_str(),
                }),
                ACTOR_SYSTEM,
            )
            .await;
    }
}
