//! Payout orchestration: intake, settlement drive, compensation, retries.

pub mod backoff;
pub mod db;
pub mod orchestrator;
pub mod retry;

use sqlx::PgConnection;

use crate::error::PayoutError;
use crate::ledger::{self, NewLedgerEntry};
use crate::types::{EntryType, PayoutRecord, WalletRecord};

pub use backoff::RetryPolicy;
pub use orchestrator::PayoutOrchestrator;
pub use retry::{RetryWorker, WorkerConfig};

/// Reverse a payout's debit exactly, against the wallet's locked current
/// balance. Used by the retry scheduler's paths into FAILED (exhaustion and
/// permanent failure on re-attempt). The ledger's (payout, entry_type)
/// uniqueness constraint backstops accidental re-entry.
pub(crate) async fn credit_compensation(
    conn: &mut PgConnection,
    payout: &PayoutRecord,
    correlation_id: &str,
) -> Result<WalletRecord, PayoutError> {
    let wallet = ledger::lock_wallet(conn, &payout.merchant_id, payout.currency).await?;
    let (before, after) = ledger::adjust_balance(conn, &wallet, payout.amount).await?;
    ledger::append_entry(
        conn,
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

    Ok(wallet)
}
