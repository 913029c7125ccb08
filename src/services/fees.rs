use bigdecimal::BigDecimal;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::tables::TableCache;
use crate::db::models::PLAN_FREE;
use crate::services::notifier::sign_payload;

/// Fees are settled to cents.
pub const FEE_SCALE: i64 = 2;

const FEE_PUSHES_PER_HOUR: u32 = 6;
const PUSH_ATTEMPTS: u64 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct FeeQuote {
    pub fee: BigDecimal,
    pub percentage: BigDecimal,
    pub merchant_receives: BigDecimal,
}

/// Pure per-transaction fee computation: plan -> percentage lookup from
/// the injected schedule. No chain dependency; applied exactly once, at
/// completion.
#[derive(Clone)]
pub struct FeeEngine {
    tables: Arc<TableCache>,
}

impl FeeEngine {
    pub fn new(tables: Arc<TableCache>) -> Self {
        Self { tables }
    }

    pub fn quote(&self, plan: &str, amount: &BigDecimal) -> FeeQuote {
        let tables = self.tables.snapshot();
        let percentage = tables
            .fee_schedule
            .get(plan)
            .or_else(|| tables.fee_schedule.get(PLAN_FREE))
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0));

        let fee = (amount * &percentage / BigDecimal::from(100)).round(FEE_SCALE);
        let merchant_receives = amount - &fee;

        FeeQuote {
            fee,
            percentage,
            merchant_receives,
        }
    }
}

/// Pushes a new global fee rate to the on-chain fee contract through the
/// privileged write path. Rate limited and fully asynchronous; a push
/// never blocks or fails a payment.
#[derive(Clone)]
pub struct FeeSyncService {
    http: reqwest::Client,
    url: Option<String>,
    secret: String,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl FeeSyncService {
    pub fn new(url: Option<String>, secret: String) -> Self {
        let per_hour = NonZeroU32::new(FEE_PUSHES_PER_HOUR).unwrap_or(NonZeroU32::MIN);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            http,
            url,
            secret,
            limiter: Arc::new(RateLimiter::direct(Quota::per_hour(per_hour))),
        }
    }

    fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Schedule an asynchronous push of `percentage` to the fee contract.
    /// Skipped (with a log line) when disabled or rate limited.
    pub fn schedule_push(&self, percentage: BigDecimal) {
        let Some(url) = self.url.clone() else {
            tracing::debug!("fee sync is not configured; skipping push");
            return;
        };
        if !self.try_acquire() {
            tracing::warn!(%percentage, "fee rate push rate limited; skipping");
            return;
        }

        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.push_with_retry(&url, &percentage).await {
                tracing::error!(%percentage, "fee rate push failed: {}", e);
            }
        });
    }

    async fn push_with_retry(&self, url: &str, percentage: &BigDecimal) -> anyhow::Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.push(url, percentage).await {
                Ok(()) => {
                    tracing::info!(%percentage, "fee rate pushed to contract");
                    return Ok(());
                }
                Err(e) if attempt < PUSH_ATTEMPTS => {
                    tracing::warn!(attempt, "fee rate push failed: {}; retrying", e);
                    tokio::time::sleep(Duration::from_secs(attempt * 2)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn push(&self, url: &str, percentage: &BigDecimal) -> anyhow::Result<()> {
        let body = serde_json::json!({ "fee_percentage": percentage.to_string() }).to_string();
        let signature = sign_payload(&self.secret, &body);

        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Signature", signature)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("fee contract endpoint returned {}", response.status());
        }
        Ok(())
    }
}
