use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::chain::ChainRouter;
use crate::compliance::{self, ComplianceContext};
use crate::config::tables::TableCache;
use crate::db::models::{Merchant, PLAN_FREE, STATUS_PENDING, Transaction, TransactionDraft};
use crate::db::queries;
use crate::error::{AppError, codes};
use crate::services::fees::FeeEngine;
use crate::services::notifier::{
    EVENT_COMPLETED, EVENT_CREATED, EVENT_PROCESSING, EVENT_REFUNDED, NotificationEmitter,
};
use crate::services::rates::{self, RateProvider};
use crate::validation;

#[derive(Debug)]
pub struct CreatePaymentInput {
    pub amount: BigDecimal,
    pub currency: String,
    pub customer_email: Option<String>,
}

#[derive(Debug)]
pub struct ProcessPaymentInput {
    pub transaction_id: Uuid,
    pub tx_hash: String,
    pub from_address: String,
}

#[derive(Debug)]
pub struct RefundInput {
    pub transaction_id: Uuid,
    pub reason: String,
}

/// Drives the payment lifecycle. All persisted state changes go through the
/// guarded queries in [`crate::db::queries`]; this service sequences
/// compliance, rate resolution, chain verification, and fee settlement
/// around them.
#[derive(Clone)]
pub struct PaymentService {
    db: PgPool,
    tables: Arc<TableCache>,
    router: Arc<ChainRouter>,
    rates: Arc<dyn RateProvider>,
    fees: FeeEngine,
    notifier: NotificationEmitter,
}

impl PaymentService {
    pub fn new(
        db: PgPool,
        tables: Arc<TableCache>,
        router: Arc<ChainRouter>,
        rates: Arc<dyn RateProvider>,
        fees: FeeEngine,
        notifier: NotificationEmitter,
    ) -> Self {
        Self {
            db,
            tables,
            router,
            rates,
            fees,
            notifier,
        }
    }

    /// Compliance gate -> rate snapshot -> persisted `pending` record.
    /// Nothing is written until every compliance stage has passed.
    pub async fn create(
        &self,
        merchant: &Merchant,
        input: CreatePaymentInput,
    ) -> Result<Transaction, AppError> {
        validation::validate_positive_amount(&input.amount)?;
        validation::validate_currency(&input.currency)?;
        if let Some(email) = &input.customer_email {
            validation::validate_email(email)?;
        }

        let to_address = merchant.wallet_address.clone().ok_or_else(|| {
            AppError::rejected(
                codes::WALLET_NOT_CONFIGURED,
                "merchant has no payout wallet configured",
            )
        })?;

        let network = self.router.network_for(&input.currency)?;
        let required_confirmations = self.router.required_confirmations(&network)?;

        let now = Utc::now();
        let daily_spend =
            queries::merchant_spend_since(&self.db, merchant.id, day_start(now)).await?;
        let monthly_spend =
            queries::merchant_spend_since(&self.db, merchant.id, month_start(now)).await?;

        let tables = self.tables.snapshot();
        let ctx = ComplianceContext::new(
            merchant.kyc_status.clone(),
            merchant.risk_level.clone(),
            merchant.edd_approved,
            input.amount.clone(),
            input.currency.clone(),
            input.customer_email.clone(),
            daily_spend,
            monthly_spend,
            tables.risk_limits.clone(),
            tables.edd_threshold.clone(),
        );
        let (snapshot, requires_review) = compliance::screen(ctx)?;

        // Rate is snapshotted here; later rate changes never touch this
        // transaction.
        let exchange_rate = self.rates.usd_rate(&input.currency).await?;
        let crypto_amount = rates::crypto_amount(&input.amount, &exchange_rate);

        let draft = TransactionDraft {
            merchant_id: merchant.id,
            customer_email: input.customer_email,
            amount: input.amount,
            currency: input.currency,
            crypto_amount,
            exchange_rate,
            network,
            to_address,
            required_confirmations,
            compliance: snapshot,
            requires_review,
            expires_at: now + Duration::minutes(tables.expiry_minutes),
        };
        let tx = queries::insert_transaction(&self.db, &Transaction::new(draft)).await?;

        tracing::info!(
            transaction_id = %tx.id,
            merchant_id = %tx.merchant_id,
            network = %tx.network,
            requires_review = tx.requires_review,
            "payment created"
        );
        self.notifier.emit(EVENT_CREATED, &tx);
        self.notifier.email(EVENT_CREATED, &tx);

        Ok(tx)
    }

    /// Verify the customer's submitted chain transaction and attach it.
    /// Verification happens before any state change; an ambiguous RPC
    /// answer leaves the transaction `pending`.
    pub async fn process(&self, input: ProcessPaymentInput) -> Result<Transaction, AppError> {
        let tx = self.fetch(input.transaction_id).await?;

        if tx.status != STATUS_PENDING {
            return Err(AppError::conflict(
                codes::ALREADY_PROCESSED,
                format!("transaction is already '{}'", tx.status),
            ));
        }
        if tx.is_expired(Utc::now()) {
            queries::fail_transaction(&self.db, tx.id, "expired").await?;
            return Err(AppError::conflict(
                codes::TX_EXPIRED,
                "payment window has expired",
            ));
        }
        if tx.requires_review {
            return Err(AppError::rejected(
                codes::REVIEW_PENDING,
                "transaction is awaiting compliance review",
            ));
        }

        validation::validate_tx_hash(&tx.network, &input.tx_hash)?;
        validation::validate_wallet_address(&tx.network, &input.from_address)?;

        let client = self.router.client_for(&tx.network)?;
        let verified = client
            .verify_payment(&input.tx_hash, &tx.to_address, &tx.crypto_amount)
            .await?;

        if !verified.from_address.eq_ignore_ascii_case(&input.from_address) {
            return Err(AppError::upstream(
                codes::VERIFICATION_FAILED,
                format!(
                    "sender {} does not match submitted address",
                    verified.from_address
                ),
            ));
        }

        let updated = queries::attach_submission(
            &self.db,
            tx.id,
            &input.tx_hash,
            &verified.from_address,
            verified.block_number,
            verified.gas_used.clone(),
            verified.gas_price.clone(),
        )
        .await?;

        match updated {
            Some(tx) => {
                tracing::info!(
                    transaction_id = %tx.id,
                    tx_hash = %input.tx_hash,
                    network = %tx.network,
                    "payment submission attached"
                );
                self.notifier.emit(EVENT_PROCESSING, &tx);
                self.notifier.email(EVENT_PROCESSING, &tx);
                Ok(tx)
            }
            // Lost the race: someone else attached first.
            None => Err(AppError::conflict(
                codes::ALREADY_PROCESSED,
                "transaction was already submitted",
            )),
        }
    }

    pub async fn status(&self, merchant_id: Uuid, id: Uuid) -> Result<Transaction, AppError> {
        let tx = self.fetch(id).await?;
        if tx.merchant_id != merchant_id {
            return Err(AppError::NotFound(format!("Transaction {} not found", id)));
        }
        Ok(tx)
    }

    pub async fn refund(
        &self,
        merchant_id: Uuid,
        input: RefundInput,
    ) -> Result<Transaction, AppError> {
        validation::validate_required("reason", &input.reason)?;
        validation::validate_max_len("reason", &input.reason, validation::REASON_MAX_LEN)?;

        let tx = self.fetch(input.transaction_id).await?;
        if tx.merchant_id != merchant_id {
            return Err(AppError::NotFound(format!(
                "Transaction {} not found",
                input.transaction_id
            )));
        }

        match queries::refund_transaction(&self.db, tx.id, &input.reason).await? {
            Some(tx) => {
                tracing::info!(transaction_id = %tx.id, "payment refunded");
                self.notifier.emit(EVENT_REFUNDED, &tx);
                Ok(tx)
            }
            None => Err(AppError::conflict(
                codes::NOT_REFUNDABLE,
                format!("only completed transactions can be refunded (is '{}')", tx.status),
            )),
        }
    }

    /// Payer-side: record the receiving wallet, once, while still pending.
    pub async fn set_customer_wallet(
        &self,
        id: Uuid,
        wallet: &str,
    ) -> Result<Transaction, AppError> {
        let tx = self.fetch(id).await?;
        validation::validate_wallet_address(&tx.network, wallet)?;

        match queries::set_customer_wallet(&self.db, id, wallet).await? {
            Some(tx) => Ok(tx),
            None if tx.customer_wallet.is_some() => Err(AppError::conflict(
                codes::WALLET_ALREADY_SET,
                "customer wallet was already set",
            )),
            None => Err(AppError::conflict(
                codes::ALREADY_PROCESSED,
                format!("transaction is already '{}'", tx.status),
            )),
        }
    }

    /// Admin-side: lift an enhanced-due-diligence hold.
    pub async fn approve_review(&self, id: Uuid) -> Result<Transaction, AppError> {
        match queries::clear_review_hold(&self.db, id).await? {
            Some(tx) => {
                tracing::info!(transaction_id = %tx.id, "review hold cleared");
                Ok(tx)
            }
            None => {
                let tx = self.fetch(id).await?;
                Err(AppError::conflict(
                    codes::ALREADY_PROCESSED,
                    format!(
                        "transaction has no clearable review hold (status '{}')",
                        tx.status
                    ),
                ))
            }
        }
    }

    /// The processing -> completed transition, driven by the confirmation
    /// monitor. Fee fields are resolved from the merchant's current plan
    /// and frozen in the same guarded update.
    pub async fn complete(
        &self,
        tx: &Transaction,
        confirmations: i32,
    ) -> Result<Option<Transaction>, AppError> {
        let plan = queries::get_subscription(&self.db, tx.merchant_id)
            .await?
            .map(|sub| sub.plan)
            .unwrap_or_else(|| PLAN_FREE.to_string());
        let quote = self.fees.quote(&plan, &tx.amount);

        let updated = queries::complete_transaction(
            &self.db,
            tx.id,
            confirmations,
            &quote.fee,
            &quote.percentage,
            &plan,
            &quote.merchant_receives,
        )
        .await?;

        if let Some(tx) = &updated {
            tracing::info!(
                transaction_id = %tx.id,
                plan = %plan,
                fee = %quote.fee,
                "payment completed"
            );
            self.notifier.emit(EVENT_COMPLETED, tx);
            self.notifier.conversion_check(tx);
        }

        Ok(updated)
    }

    pub async fn public_view(&self, id: Uuid) -> Result<Transaction, AppError> {
        self.fetch(id).await
    }

    async fn fetch(&self, id: Uuid) -> Result<Transaction, AppError> {
        queries::get_transaction(&self.db, id)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    AppError::NotFound(format!("Transaction {} not found", id))
                }
                _ => AppError::Database(e),
            })
    }
}

fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now
        .date_naive()
        .with_day(1)
        .unwrap_or_else(|| now.date_naive());
    first.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn day_start_truncates_to_midnight() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 13, 45, 12).unwrap();
        let start = day_start(now);
        assert_eq!(start.hour(), 0);
        assert_eq!(start.minute(), 0);
        assert_eq!(start.day(), 15);
    }

    #[test]
    fn month_start_truncates_to_first() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 13, 45, 12).unwrap();
        let start = month_start(now);
        assert_eq!(start.day(), 1);
        assert_eq!(start.month(), 6);
        assert_eq!(start.hour(), 0);
    }
}
