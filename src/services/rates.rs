use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::sync::Arc;

use crate::config::tables::TableCache;
use crate::error::AppError;

/// Crypto amounts are frozen at 8 decimal places.
pub const CRYPTO_SCALE: i64 = 8;

/// Source of USD rates. Callers depend on this trait only; the
/// deterministic table-backed provider below can be replaced by a live
/// price feed without touching them.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn usd_rate(&self, currency: &str) -> Result<BigDecimal, AppError>;
}

pub struct FixedRateProvider {
    tables: Arc<TableCache>,
}

impl FixedRateProvider {
    pub fn new(tables: Arc<TableCache>) -> Self {
        Self { tables }
    }
}

#[async_trait]
impl RateProvider for FixedRateProvider {
    async fn usd_rate(&self, currency: &str) -> Result<BigDecimal, AppError> {
        self.tables
            .snapshot()
            .exchange_rates
            .get(currency)
            .cloned()
            .ok_or_else(|| AppError::Validation(format!("no exchange rate for currency: {}", currency)))
    }
}

/// `amount / rate`, rounded to the fixed crypto precision. Computed once at
/// creation and never recomputed.
pub fn crypto_amount(amount: &BigDecimal, rate: &BigDecimal) -> BigDecimal {
    (amount / rate).round(CRYPTO_SCALE).with_scale(CRYPTO_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tables::EngineTables;
    use std::str::FromStr;

    #[tokio::test]
    async fn stablecoins_resolve_to_parity() {
        let provider = FixedRateProvider::new(TableCache::from_tables(EngineTables::default()));
        assert_eq!(provider.usd_rate("USDC").await.unwrap(), BigDecimal::from(1));
        assert_eq!(provider.usd_rate("DAI").await.unwrap(), BigDecimal::from(1));
    }

    #[tokio::test]
    async fn unknown_currency_is_rejected() {
        let provider = FixedRateProvider::new(TableCache::from_tables(EngineTables::default()));
        assert!(matches!(
            provider.usd_rate("DOGE").await,
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn derives_crypto_amount() {
        let amount = BigDecimal::from(100);
        let rate = BigDecimal::from(2000);
        assert_eq!(
            crypto_amount(&amount, &rate),
            BigDecimal::from_str("0.05").unwrap()
        );
    }

    #[test]
    fn rounds_to_eight_places() {
        let amount = BigDecimal::from(1);
        let rate = BigDecimal::from(3);
        assert_eq!(
            crypto_amount(&amount, &rate),
            BigDecimal::from_str("0.33333333").unwrap()
        );
    }

    #[test]
    fn parity_amount_is_unchanged() {
        let amount = BigDecimal::from_str("250.75").unwrap();
        let rate = BigDecimal::from(1);
        assert_eq!(crypto_amount(&amount, &rate), amount);
    }
}
