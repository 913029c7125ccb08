use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Months, Utc};
use cron::Schedule;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::tables::TableCache;
use crate::db::models::{
    BILLING_FAILED, BILLING_PAID, BILLING_WAIVED, BillingRecord, PLANS, Subscription,
};
use crate::db::queries;
use crate::error::AppError;
use crate::services::fees::FeeSyncService;

/// Subscription billing: cron-driven period rollover, merchant plan
/// changes, and admin waivers. Billing failures are recorded in the
/// append-only history and never suspend payment processing.
#[derive(Clone)]
pub struct BillingService {
    db: PgPool,
    tables: Arc<TableCache>,
    fee_sync: FeeSyncService,
}

impl BillingService {
    pub fn new(db: PgPool, tables: Arc<TableCache>, fee_sync: FeeSyncService) -> Self {
        Self {
            db,
            tables,
            fee_sync,
        }
    }

    pub fn spawn(self, cron_expr: String) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cron_expr).await })
    }

    pub async fn run(self, cron_expr: String) {
        let schedule = match Schedule::from_str(&cron_expr) {
            Ok(schedule) => schedule,
            Err(e) => {
                error!("invalid billing cron '{}': {}", cron_expr, e);
                return;
            }
        };
        info!(cron = %cron_expr, "billing scheduler started");

        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                break;
            };
            let wait = (next - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(1));
            sleep(wait).await;

            match self.run_rollover().await {
                Ok(count) if count > 0 => info!(count, "billing cycles rolled over"),
                Ok(_) => {}
                Err(e) => error!("billing rollover failed: {}", e),
            }
        }
    }

    /// Roll every subscription whose billing date has passed. Each failure
    /// is recorded and skipped; one bad subscription never stops the batch.
    pub async fn run_rollover(&self) -> anyhow::Result<u32> {
        let due = queries::due_subscriptions(&self.db, Utc::now()).await?;
        let mut rolled = 0;

        for sub in due {
            match self.bill_subscription(&sub).await {
                Ok(()) => rolled += 1,
                Err(e) => {
                    error!(subscription_id = %sub.id, "billing attempt failed: {}", e);
                    let record = BillingRecord {
                        id: Uuid::new_v4(),
                        subscription_id: sub.id,
                        amount: sub.amount.clone(),
                        status: BILLING_FAILED.to_string(),
                        note: Some(e.to_string()),
                        attempted_at: Utc::now(),
                    };
                    if let Err(e) = queries::insert_billing_record(&self.db, &record).await {
                        error!(subscription_id = %sub.id, "failed to record billing failure: {}", e);
                    }
                }
            }
        }

        Ok(rolled)
    }

    async fn bill_subscription(&self, sub: &Subscription) -> anyhow::Result<()> {
        let record = BillingRecord {
            id: Uuid::new_v4(),
            subscription_id: sub.id,
            amount: sub.amount.clone(),
            status: BILLING_PAID.to_string(),
            note: Some("billing cycle rollover".to_string()),
            attempted_at: Utc::now(),
        };
        queries::insert_billing_record(&self.db, &record).await?;

        let (start, end) = next_period(sub.current_period_end);
        queries::advance_period(&self.db, sub.id, start, end, end).await?;
        Ok(())
    }

    /// Merchant-initiated plan change. The new plan's fee rate is pushed to
    /// the on-chain contract asynchronously, off the payment path.
    pub async fn change_plan(
        &self,
        merchant_id: Uuid,
        plan: &str,
    ) -> Result<Subscription, AppError> {
        if !PLANS.contains(&plan) {
            return Err(AppError::Validation(format!("unknown plan: {}", plan)));
        }

        let tables = self.tables.snapshot();
        let amount = tables
            .plan_pricing
            .get(plan)
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0));

        let sub = queries::change_plan(&self.db, merchant_id, plan, &amount)
            .await?
            .ok_or_else(|| {
                AppError::NotFound("no active subscription for merchant".to_string())
            })?;

        info!(merchant_id = %merchant_id, plan = %plan, "subscription plan changed");
        if let Some(percentage) = tables.fee_schedule.get(plan) {
            self.fee_sync.schedule_push(percentage.clone());
        }

        Ok(sub)
    }

    /// Admin waiver: the current cycle is recorded as waived and the period
    /// advances without a charge.
    pub async fn waive_current(
        &self,
        merchant_id: Uuid,
        note: Option<String>,
    ) -> Result<Subscription, AppError> {
        let sub = queries::get_subscription(&self.db, merchant_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound("no active subscription for merchant".to_string())
            })?;

        let record = BillingRecord {
            id: Uuid::new_v4(),
            subscription_id: sub.id,
            amount: sub.amount.clone(),
            status: BILLING_WAIVED.to_string(),
            note: note.or_else(|| Some("billing cycle waived".to_string())),
            attempted_at: Utc::now(),
        };
        queries::insert_billing_record(&self.db, &record).await?;

        let (start, end) = next_period(sub.current_period_end);
        queries::advance_period(&self.db, sub.id, start, end, end)
            .await?
            .ok_or_else(|| AppError::Internal("subscription vanished mid-waiver".to_string()))
    }
}

/// The next billing period starts where the previous one ended.
pub fn next_period(from: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = from
        .checked_add_months(Months::new(1))
        .unwrap_or(from + Duration::days(30));
    (from, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_period_spans_one_month() {
        let from = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        let (start, end) = next_period(from);
        assert_eq!(start, from);
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 2, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn next_period_rolls_the_year() {
        let from = Utc.with_ymd_and_hms(2025, 12, 15, 0, 0, 0).unwrap();
        let (_, end) = next_period(from);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn all_plans_are_known() {
        for plan in ["free", "starter", "professional", "enterprise"] {
            assert!(PLANS.contains(&plan));
        }
        assert!(!PLANS.contains(&"platinum"));
    }
}
