//! Ledger Store: wallet rows and append-only wallet ledger entries.
//!
//! Every function takes a live connection so the caller controls the
//! transaction boundary. Wallet rows are the only hot shared resource;
//! they are mutated exclusively under `SELECT ... FOR UPDATE`.

use rust_decimal::Decimal;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::error::PayoutError;
use crate::types::{Currency, EntryType, WalletRecord};

/// A balance-affecting movement to be appended to the ledger.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry<'a> {
    pub wallet_id: Uuid,
    pub payout_id: Option<Uuid>,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub currency: Currency,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub correlation_id: &'a str,
}

/// Acquire an exclusive, blocking lock on the (merchant, currency) wallet
/// row for the duration of the enclosing transaction.
///
/// Creates the wallet with zero balance first if absent, then re-acquires
/// the lock on the new row. `ON CONFLICT DO NOTHING` on the creation insert
/// means two concurrent first-payouts race safely: the loser's re-read
/// blocks on the winner's lock instead of failing.
pub async fn lock_wallet(
    conn: &mut PgConnection,
    merchant_id: &str,
    currency: Currency,
) -> Result<WalletRecord, PayoutError> {
    if let Some(wallet) = fetch_wallet_for_update(conn, merchant_id, currency).await? {
        return Ok(wallet);
    }

    sqlx::query(
        r#"
        INSERT INTO wallets (id, merchant_id, currency, balance_available)
        VALUES ($1, $2, $3, 0)
        ON CONFLICT (merchant_id, currency) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(merchant_id)
    .bind(currency.as_str())
    .execute(&mut *conn)
    .await?;

    match fetch_wallet_for_update(conn, merchant_id, currency).await? {
        Some(wallet) => Ok(wallet),
        None => Err(PayoutError::InvariantViolation(format!(
            "wallet missing after creation for merchant {}",
            merchant_id
        ))),
    }
}

/// Re-acquire the lock on a known wallet row by id.
pub async fn lock_wallet_by_id(
    conn: &mut PgConnection,
    wallet_id: Uuid,
) -> Result<WalletRecord, PayoutError> {
    let row = sqlx::query(
        r#"
        SELECT id, merchant_id, currency, balance_available
        FROM wallets
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(wallet_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => row_to_wallet(&row),
        None => Err(PayoutError::InvariantViolation(format!(
            "wallet {} not found",
            wallet_id
        ))),
    }
}

/// Apply a signed delta to the locked wallet's available balance.
///
/// Fails with `InsufficientFunds` if a debit would take the balance
/// negative; credits are never rejected. Returns (before, after).
pub async fn adjust_balance(
    conn: &mut PgConnection,
    wallet: &WalletRecord,
    delta: Decimal,
) -> Result<(Decimal, Decimal), PayoutError> {
    let before = wallet.balance_available;
    let after = before + delta;

    if delta < Decimal::ZERO && after < Decimal::ZERO {
        return Err(PayoutError::InsufficientFunds);
    }

    sqlx::query(
        r#"
        UPDATE wallets
        SET balance_available = $1, updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(after)
    .bind(wallet.id)
    .execute(&mut *conn)
    .await?;

    Ok((before, after))
}

/// Append an immutable ledger entry.
///
/// The (payout_id, entry_type) uniqueness constraint is a defensive
/// invariant: at most one debit and one credit may ever exist per payout.
/// A violation surfaces as `DuplicateLedgerEntry` rather than a raw
/// database error.
pub async fn append_entry(
    conn: &mut PgConnection,
    entry: NewLedgerEntry<'_>,
) -> Result<(), PayoutError> {
    let result = sqlx::query(
        r#"
        INSERT INTO wallet_ledger_entries
            (id, wallet_id, payout_id, entry_type, amount, currency,
             balance_before, balance_after, correlation_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.wallet_id)
    .bind(entry.payout_id)
    .bind(entry.entry_type.id())
    .bind(entry.amount)
    .bind(entry.currency.as_str())
    .bind(entry.balance_before)
    .bind(entry.balance_after)
    .bind(entry.correlation_id)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(PayoutError::DuplicateLedgerEntry(
                entry
                    .payout_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "<none>".to_string()),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

async fn fetch_wallet_for_update(
    conn: &mut PgConnection,
    merchant_id: &str,
    currency: Currency,
) -> Result<Option<WalletRecord>, PayoutError> {
    let row = sqlx::query(
        r#"
        SELECT id, merchant_id, currency, balance_available
        FROM wallets
        WHERE merchant_id = $1 AND currency = $2
        FOR UPDATE
        "#,
    )
    .bind(merchant_id)
    .bind(currency.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(row_to_wallet(&row)?)),
        None => Ok(None),
    }
}

fn row_to_wallet(row: &sqlx::postgres::PgRow) -> Result<WalletRecord, PayoutError> {
    let currency_str: String = row.get("currency");
    let currency = currency_str
        .parse::<Currency>()
        .map_err(|_| PayoutError::InvariantViolation(format!("bad currency: {}", currency_str)))?;

    Ok(WalletRecord {
        id: row.get("id"),
        merchant_id: row.get("merchant_id"),
        currency,
        balance_available: row.get("balance_available"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_id_roundtrip() {
        assert_eq!(EntryType::from_id(EntryType::Debit.id()), Some(EntryType::Debit));
        assert_eq!(EntryType::from_id(EntryType::Credit.id()), Some(EntryType::Credit));
        assert_eq!(EntryType::from_id(0), None);
    }
}
