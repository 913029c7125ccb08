use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;
use sqlx::{PgPool, Result};
use uuid::Uuid;

use crate::db::models::{BillingRecord, Merchant, Subscription, Transaction};

// --- Transaction record store ---
//
// Every status transition below is a conditional UPDATE guarded on the
// expected current status. Under concurrent callers exactly one UPDATE
// matches; the losers observe `None` and surface a conflict.

pub async fn insert_transaction(pool: &PgPool, tx: &Transaction) -> Result<Transaction> {
    sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (
            id, merchant_id, customer_email, amount, currency,
            crypto_amount, exchange_rate, network, to_address,
            confirmation_count, required_confirmations, status, compliance,
            requires_review, created_at, updated_at, expires_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING *
        "#,
    )
    .bind(tx.id)
    .bind(tx.merchant_id)
    .bind(&tx.customer_email)
    .bind(&tx.amount)
    .bind(&tx.currency)
    .bind(&tx.crypto_amount)
    .bind(&tx.exchange_rate)
    .bind(&tx.network)
    .bind(&tx.to_address)
    .bind(tx.confirmation_count)
    .bind(tx.required_confirmations)
    .bind(&tx.status)
    .bind(&tx.compliance)
    .bind(tx.requires_review)
    .bind(tx.created_at)
    .bind(tx.updated_at)
    .bind(tx.expires_at)
    .fetch_one(pool)
    .await
}

pub async fn get_transaction(pool: &PgPool, id: Uuid) -> Result<Transaction> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
}

pub async fn list_merchant_transactions(
    pool: &PgPool,
    merchant_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE merchant_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(merchant_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Link a customer-submitted chain transaction. Requires `pending`; the
/// first submission wins, later callers get `None`.
#[allow(clippy::too_many_arguments)]
pub async fn attach_submission(
    pool: &PgPool,
    id: Uuid,
    tx_hash: &str,
    from_address: &str,
    block_number: i64,
    gas_used: Option<BigDecimal>,
    gas_price: Option<BigDecimal>,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = 'processing',
            tx_hash = $2,
            from_address = $3,
            customer_wallet = COALESCE(customer_wallet, $3),
            block_number = $4,
            gas_used = $5,
            gas_price = $6,
            processed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(tx_hash)
    .bind(from_address)
    .bind(block_number)
    .bind(gas_used)
    .bind(gas_price)
    .fetch_optional(pool)
    .await
}

/// Idempotent confirmation counter update. The counter only moves forward.
pub async fn record_confirmation(
    pool: &PgPool,
    id: Uuid,
    confirmations: i32,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET confirmation_count = GREATEST(confirmation_count, $2),
            updated_at = NOW()
        WHERE id = $1 AND status = 'processing'
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(confirmations)
    .fetch_optional(pool)
    .await
}

/// The processing -> completed transition. Fee fields are frozen in the
/// same guarded UPDATE so a transaction can complete at most once.
#[allow(clippy::too_many_arguments)]
pub async fn complete_transaction(
    pool: &PgPool,
    id: Uuid,
    confirmations: i32,
    platform_fee: &BigDecimal,
    platform_fee_percentage: &BigDecimal,
    merchant_plan: &str,
    merchant_amount: &BigDecimal,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = 'completed',
            confirmation_count = GREATEST(confirmation_count, $2),
            platform_fee = $3,
            platform_fee_percentage = $4,
            merchant_plan = $5,
            merchant_amount = $6,
            completed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = 'processing'
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(confirmations)
    .bind(platform_fee)
    .bind(platform_fee_percentage)
    .bind(merchant_plan)
    .bind(merchant_amount)
    .fetch_optional(pool)
    .await
}

pub async fn refund_transaction(
    pool: &PgPool,
    id: Uuid,
    reason: &str,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = 'refunded',
            refund_reason = $2,
            refunded_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = 'completed'
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(reason)
    .fetch_optional(pool)
    .await
}

pub async fn fail_transaction(
    pool: &PgPool,
    id: Uuid,
    reason: &str,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = 'failed',
            failure_reason = $2,
            updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'processing')
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(reason)
    .fetch_optional(pool)
    .await
}

/// Payer sets the wallet exactly once, before submission.
pub async fn set_customer_wallet(
    pool: &PgPool,
    id: Uuid,
    wallet: &str,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET customer_wallet = $2,
            updated_at = NOW()
        WHERE id = $1 AND status = 'pending' AND customer_wallet IS NULL
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(wallet)
    .fetch_optional(pool)
    .await
}

pub async fn clear_review_hold(pool: &PgPool, id: Uuid) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET requires_review = FALSE,
            review_cleared_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND requires_review AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Sweep: abandoned pending payments past their expiry window fail.
pub async fn expire_stale(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE transactions
        SET status = 'failed',
            failure_reason = 'expired',
            updated_at = NOW()
        WHERE status = 'pending' AND expires_at < NOW()
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn list_processing(pool: &PgPool, limit: i64) -> Result<Vec<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE status = 'processing' ORDER BY created_at ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Total non-failed volume for a merchant since `since`, for limit checks.
pub async fn merchant_spend_since(
    pool: &PgPool,
    merchant_id: Uuid,
    since: DateTime<Utc>,
) -> Result<BigDecimal> {
    sqlx::query_scalar::<_, BigDecimal>(
        r#"
        SELECT COALESCE(SUM(amount), 0)
        FROM transactions
        WHERE merchant_id = $1 AND created_at >= $2 AND status <> 'failed'
        "#,
    )
    .bind(merchant_id)
    .bind(since)
    .fetch_one(pool)
    .await
}

// --- Merchant queries ---

pub async fn get_merchant(pool: &PgPool, id: Uuid) -> Result<Merchant> {
    sqlx::query_as::<_, Merchant>("SELECT * FROM merchants WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
}

pub async fn get_merchant_by_api_key_hash(
    pool: &PgPool,
    api_key_hash: &str,
) -> Result<Option<Merchant>> {
    sqlx::query_as::<_, Merchant>("SELECT * FROM merchants WHERE api_key_hash = $1")
        .bind(api_key_hash)
        .fetch_optional(pool)
        .await
}

// --- Subscription queries ---

pub async fn get_subscription(pool: &PgPool, merchant_id: Uuid) -> Result<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE merchant_id = $1")
        .bind(merchant_id)
        .fetch_optional(pool)
        .await
}

pub async fn change_plan(
    pool: &PgPool,
    merchant_id: Uuid,
    plan: &str,
    amount: &BigDecimal,
) -> Result<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET plan = $2, amount = $3, updated_at = NOW()
        WHERE merchant_id = $1 AND status = 'active'
        RETURNING *
        "#,
    )
    .bind(merchant_id)
    .bind(plan)
    .bind(amount)
    .fetch_optional(pool)
    .await
}

pub async fn due_subscriptions(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE status = 'active' AND next_billing_date <= $1",
    )
    .bind(now)
    .fetch_all(pool)
    .await
}

pub async fn advance_period(
    pool: &PgPool,
    subscription_id: Uuid,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    next_billing_date: DateTime<Utc>,
) -> Result<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET current_period_start = $2,
            current_period_end = $3,
            next_billing_date = $4,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(subscription_id)
    .bind(period_start)
    .bind(period_end)
    .bind(next_billing_date)
    .fetch_optional(pool)
    .await
}

/// Billing history is append-only; attempts are recorded, never rewritten.
pub async fn insert_billing_record(pool: &PgPool, record: &BillingRecord) -> Result<BillingRecord> {
    sqlx::query_as::<_, BillingRecord>(
        r#"
        INSERT INTO billing_records (id, subscription_id, amount, status, note, attempted_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(record.id)
    .bind(record.subscription_id)
    .bind(&record.amount)
    .bind(&record.status)
    .bind(&record.note)
    .bind(record.attempted_at)
    .fetch_one(pool)
    .await
}

pub async fn list_billing_records(
    pool: &PgPool,
    subscription_id: Uuid,
    limit: i64,
) -> Result<Vec<BillingRecord>> {
    sqlx::query_as::<_, BillingRecord>(
        "SELECT * FROM billing_records WHERE subscription_id = $1 ORDER BY attempted_at DESC LIMIT $2",
    )
    .bind(subscription_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}
