//! Payout and payout-request persistence.
//!
//! Every function takes a live connection; the orchestrator and the retry
//! worker own the transaction boundaries. Status transitions are the only
//! mutation payout rows ever see.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::error::PayoutError;
use crate::types::{Currency, PayoutRecord, PayoutRequestRecord, PayoutStatus, RequestStatus};

/// Insert the idempotency envelope in status CREATED.
///
/// Returns `None` when another transaction won the race on
/// (merchant_id, idempotency_key); the caller must re-read the winner's row
/// and resolve it as a replay or a conflict.
pub async fn insert_request(
    conn: &mut PgConnection,
    merchant_id: &str,
    idempotency_key: &str,
    request_hash: &str,
) -> Result<Option<PayoutRequestRecord>, PayoutError> {
    let id = Uuid::new_v4();
    let row = sqlx::query(
        r#"
        INSERT INTO payout_requests (id, merchant_id, idempotency_key, request_hash, payout_id, status)
        VALUES ($1, $2, $3, $4, NULL, $5)
        ON CONFLICT (merchant_id, idempotency_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(merchant_id)
    .bind(idempotency_key)
    .bind(request_hash)
    .bind(RequestStatus::Created.id())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|_| PayoutRequestRecord {
        id,
        merchant_id: merchant_id.to_string(),
        idempotency_key: idempotency_key.to_string(),
        request_hash: request_hash.to_string(),
        payout_id: None,
        status: RequestStatus::Created,
    }))
}

pub async fn find_request(
    conn: &mut PgConnection,
    merchant_id: &str,
    idempotency_key: &str,
) -> Result<Option<PayoutRequestRecord>, PayoutError> {
    let row = sqlx::query(
        r#"
        SELECT id, merchant_id, idempotency_key, request_hash, payout_id, status
        FROM payout_requests
        WHERE merchant_id = $1 AND idempotency_key = $2
        "#,
    )
    .bind(merchant_id)
    .bind(idempotency_key)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(row_to_request(&row)?)),
        None => Ok(None),
    }
}

pub async fn find_request_by_payout(
    conn: &mut PgConnection,
    payout_id: Uuid,
) -> Result<Option<PayoutRequestRecord>, PayoutError> {
    let row = sqlx::query(
        r#"
        SELECT id, merchant_id, idempotency_key, request_hash, payout_id, status
        FROM payout_requests
        WHERE payout_id = $1
        "#,
    )
    .bind(payout_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(row_to_request(&row)?)),
        None => Ok(None),
    }
}

/// Link the freshly created payout and move the envelope to IN_PROGRESS.
pub async fn link_payout(
    conn: &mut PgConnection,
    request_id: Uuid,
    payout_id: Uuid,
) -> Result<(), PayoutError> {
    sqlx::query(
        r#"
        UPDATE payout_requests
        SET payout_id = $1, status = $2, updated_at = now()
        WHERE id = $3
        "#,
    )
    .bind(payout_id)
    .bind(RequestStatus::InProgress.id())
    .bind(request_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn set_request_status(
    conn: &mut PgConnection,
    request_id: Uuid,
    status: RequestStatus,
) -> Result<(), PayoutError> {
    sqlx::query(
        r#"
        UPDATE payout_requests
        SET status = $1, updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(status.id())
    .bind(request_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Create the payout row in status PENDING with attempt count zero.
pub async fn insert_payout(
    conn: &mut PgConnection,
    merchant_id: &str,
    amount: Decimal,
    currency: Currency,
) -> Result<PayoutRecord, PayoutError> {
    let id = Uuid::new_v4();
    let row = sqlx::query(
        r#"
        INSERT INTO payouts (id, merchant_id, amount, currency, status, attempt_count)
        VALUES ($1, $2, $3, $4, $5, 0)
        RETURNING created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(merchant_id)
    .bind(amount)
    .bind(currency.as_str())
    .bind(PayoutStatus::Pending.id())
    .fetch_one(&mut *conn)
    .await?;

    Ok(PayoutRecord {
        id,
        merchant_id: merchant_id.to_string(),
        amount,
        currency,
        status: PayoutStatus::Pending,
        failure_reason: None,
        external_reference: None,
        attempt_count: 0,
        next_retry_at: None,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub async fn get_payout(
    conn: &mut PgConnection,
    payout_id: Uuid,
) -> Result<Option<PayoutRecord>, PayoutError> {
    let row = sqlx::query(
        r#"
        SELECT id, merchant_id, amount, currency, status, failure_reason,
               external_reference, attempt_count, next_retry_at, created_at, updated_at
        FROM payouts
        WHERE id = $1
        "#,
    )
    .bind(payout_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(row_to_payout(&row)?)),
        None => Ok(None),
    }
}

/// Terminal success: store the external reference, clear retry scheduling.
pub async fn mark_success(
    conn: &mut PgConnection,
    payout_id: Uuid,
    external_reference: &str,
) -> Result<(), PayoutError> {
    sqlx::query(
        r#"
        UPDATE payouts
        SET status = $1, external_reference = $2, failure_reason = NULL,
            next_retry_at = NULL, updated_at = now()
        WHERE id = $3
        "#,
    )
    .bind(PayoutStatus::Success.id())
    .bind(external_reference)
    .bind(payout_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Transition to NEEDS_RETRY with the given attempt count and due time.
pub async fn mark_needs_retry(
    conn: &mut PgConnection,
    payout_id: Uuid,
    attempt_count: i32,
    next_retry_at: DateTime<Utc>,
    reason: &str,
) -> Result<(), PayoutError> {
    sqlx::query(
        r#"
        UPDATE payouts
        SET status = $1, attempt_count = $2, next_retry_at = $3,
            failure_reason = $4, updated_at = now()
        WHERE id = $5
        "#,
    )
    .bind(PayoutStatus::NeedsRetry.id())
    .bind(attempt_count)
    .bind(next_retry_at)
    .bind(reason)
    .bind(payout_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Scheduler lease: advance attempt count and due time before the external
/// call, leaving status and failure reason untouched.
pub async fn lease_retry(
    conn: &mut PgConnection,
    payout_id: Uuid,
    attempt_count: i32,
    next_retry_at: DateTime<Utc>,
) -> Result<(), PayoutError> {
    sqlx::query(
        r#"
        UPDATE payouts
        SET attempt_count = $1, next_retry_at = $2, updated_at = now()
        WHERE id = $3
        "#,
    )
    .bind(attempt_count)
    .bind(next_retry_at)
    .bind(payout_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn set_failure_reason(
    conn: &mut PgConnection,
    payout_id: Uuid,
    reason: &str,
) -> Result<(), PayoutError> {
    sqlx::query(
        r#"
        UPDATE payouts
        SET failure_reason = $1, updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(reason)
    .bind(payout_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Terminal failure: store the reason, clear retry scheduling.
pub async fn mark_failed(
    conn: &mut PgConnection,
    payout_id: Uuid,
    reason: &str,
) -> Result<(), PayoutError> {
    sqlx::query(
        r#"
        UPDATE payouts
        SET status = $1, failure_reason = $2, next_retry_at = NULL, updated_at = now()
        WHERE id = $3
        "#,
    )
    .bind(PayoutStatus::Failed.id())
    .bind(reason)
    .bind(payout_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Claim payouts due for re-attempt, oldest due time first.
///
/// `FOR UPDATE SKIP LOCKED` lets concurrent scheduler instances pass over
/// rows already claimed by another instance instead of blocking on them.
pub async fn claim_due(
    conn: &mut PgConnection,
    limit: i64,
) -> Result<Vec<PayoutRecord>, PayoutError> {
    let rows = sqlx::query(
        r#"
        SELECT id, merchant_id, amount, currency, status, failure_reason,
               external_reference, attempt_count, next_retry_at, created_at, updated_at
        FROM payouts
        WHERE status = $1
          AND next_retry_at IS NOT NULL
          AND next_retry_at <= now()
        ORDER BY next_retry_at ASC
        LIMIT $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(PayoutStatus::NeedsRetry.id())
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(row_to_payout(&row)?);
    }

    Ok(records)
}

fn row_to_payout(row: &sqlx::postgres::PgRow) -> Result<PayoutRecord, PayoutError> {
    let status_id: i16 = row.get("status");
    let status = PayoutStatus::from_id(status_id).ok_or_else(|| {
        PayoutError::InvariantViolation(format!("invalid payout status id: {}", status_id))
    })?;

    let currency_str: String = row.get("currency");
    let currency = currency_str.parse::<Currency>().map_err(|_| {
        PayoutError::InvariantViolation(format!("invalid currency: {}", currency_str))
    })?;

    Ok(PayoutRecord {
        id: row.get("id"),
        merchant_id: row.get("merchant_id"),
        amount: row.get("amount"),
        currency,
        status,
        failure_reason: row.get("failure_reason"),
        external_reference: row.get("external_reference"),
        attempt_count: row.get("attempt_count"),
        next_retry_at: row.get("next_retry_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_request(row: &sqlx::postgres::PgRow) -> Result<PayoutRequestRecord, PayoutError> {
    let status_id: i16 = row.get("status");
    let status = RequestStatus::from_id(status_id).ok_or_else(|| {
        PayoutError::InvariantViolation(format!("invalid request status id: {}", status_id))
    })?;

    Ok(PayoutRequestRecord {
        id: row.get("id"),
        merchant_id: row.get("merchant_id"),
        idempotency_key: row.get("idempotency_key"),
        request_hash: row.get("request_hash"),
        payout_id: row.get("payout_id"),
        status,
    })
}
