use arc_swap::ArcSwap;
use bigdecimal::BigDecimal;
use bigdecimal::num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Policy tables the engine consults on every request: exchange rates, fee
/// schedule, risk-tier limits, network routing. Configuration data, not
/// code: operators adjust them through a JSON file without a redeploy.
/// Components receive the cache at construction, never ambient globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTables {
    /// Currency code -> USD rate.
    pub exchange_rates: HashMap<String, BigDecimal>,
    /// Subscription plan -> platform fee percentage.
    pub fee_schedule: HashMap<String, BigDecimal>,
    /// Subscription plan -> monthly price.
    pub plan_pricing: HashMap<String, BigDecimal>,
    /// Risk tier -> transaction caps.
    pub risk_limits: HashMap<String, LimitTier>,
    /// Network name -> chain parameters.
    pub networks: HashMap<String, NetworkConfig>,
    /// Currency code -> network name.
    pub routing: HashMap<String, String>,
    /// Amount at or above which enhanced due diligence applies.
    pub edd_threshold: BigDecimal,
    /// Minutes an unsubmitted payment stays payable.
    pub expiry_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitTier {
    pub single_transaction: BigDecimal,
    pub daily: BigDecimal,
    pub monthly: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub required_confirmations: i32,
    /// Decimal places of the on-chain value unit (18 for EVM wei, 8 for BTC).
    pub value_decimals: i64,
}

fn dec(unscaled: i64, scale: i64) -> BigDecimal {
    BigDecimal::new(BigInt::from(unscaled), scale)
}

impl Default for EngineTables {
    fn default() -> Self {
        let exchange_rates = HashMap::from([
            ("USDC".to_string(), dec(1, 0)),
            ("USDT".to_string(), dec(1, 0)),
            ("DAI".to_string(), dec(1, 0)),
            ("ETH".to_string(), dec(2000, 0)),
            ("BTC".to_string(), dec(45000, 0)),
        ]);

        let fee_schedule = HashMap::from([
            ("free".to_string(), dec(25, 1)),
            ("starter".to_string(), dec(20, 1)),
            ("professional".to_string(), dec(15, 1)),
            ("enterprise".to_string(), dec(10, 1)),
        ]);

        let plan_pricing = HashMap::from([
            ("free".to_string(), dec(0, 0)),
            ("starter".to_string(), dec(29, 0)),
            ("professional".to_string(), dec(99, 0)),
            ("enterprise".to_string(), dec(299, 0)),
        ]);

        let risk_limits = HashMap::from([
            (
                "low".to_string(),
                LimitTier {
                    single_transaction: dec(10_000, 0),
                    daily: dec(50_000, 0),
                    monthly: dec(500_000, 0),
                },
            ),
            (
                "medium".to_string(),
                LimitTier {
                    single_transaction: dec(5_000, 0),
                    daily: dec(25_000, 0),
                    monthly: dec(250_000, 0),
                },
            ),
            (
                "high".to_string(),
                LimitTier {
                    single_transaction: dec(2_500, 0),
                    daily: dec(10_000, 0),
                    monthly: dec(100_000, 0),
                },
            ),
        ]);

        let networks = HashMap::from([
            (
                "ethereum".to_string(),
                NetworkConfig {
                    rpc_url: "http://127.0.0.1:8545".to_string(),
                    required_confirmations: 12,
                    value_decimals: 18,
                },
            ),
            (
                "polygon".to_string(),
                NetworkConfig {
                    rpc_url: "http://127.0.0.1:8546".to_string(),
                    required_confirmations: 15,
                    value_decimals: 18,
                },
            ),
            (
                "bitcoin".to_string(),
                NetworkConfig {
                    rpc_url: "http://127.0.0.1:8332".to_string(),
                    required_confirmations: 6,
                    value_decimals: 8,
                },
            ),
        ]);

        // Stablecoins settle on the default low-fee network.
        let routing = HashMap::from([
            ("USDC".to_string(), "polygon".to_string()),
            ("USDT".to_string(), "polygon".to_string()),
            ("DAI".to_string(), "polygon".to_string()),
            ("ETH".to_string(), "ethereum".to_string()),
            ("BTC".to_string(), "bitcoin".to_string()),
        ]);

        EngineTables {
            exchange_rates,
            fee_schedule,
            plan_pricing,
            risk_limits,
            networks,
            routing,
            edd_threshold: dec(10_000, 0),
            expiry_minutes: 15,
        }
    }
}

/// Hot-swappable holder for [`EngineTables`], refreshed from disk in the
/// background so table edits take effect without a restart.
pub struct TableCache {
    inner: ArcSwap<EngineTables>,
    path: Option<PathBuf>,
}

impl TableCache {
    pub fn load(path: Option<&str>) -> anyhow::Result<Arc<Self>> {
        let tables = match path {
            Some(p) => read_tables(p)?,
            None => EngineTables::default(),
        };

        Ok(Arc::new(TableCache {
            inner: ArcSwap::from_pointee(tables),
            path: path.map(PathBuf::from),
        }))
    }

    pub fn from_tables(tables: EngineTables) -> Arc<Self> {
        Arc::new(TableCache {
            inner: ArcSwap::from_pointee(tables),
            path: None,
        })
    }

    pub fn snapshot(&self) -> Arc<EngineTables> {
        self.inner.load_full()
    }

    pub fn reload_once(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.path {
            let tables = read_tables(path)?;
            self.inner.store(Arc::new(tables));
        }
        Ok(())
    }

    /// Spawn a background refresher that re-reads the table file. A failed
    /// reload keeps the previous snapshot.
    pub fn start_refresher(self: &Arc<Self>, interval: Duration) {
        if self.path.is_none() {
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                if let Err(e) = cache.reload_once() {
                    tracing::warn!("Failed to reload payment tables: {}", e);
                }
            }
        });
    }
}

fn read_tables(path: impl AsRef<std::path::Path>) -> anyhow::Result<EngineTables> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let tables: EngineTables = serde_json::from_str(&raw)?;
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::str::FromStr;

    #[test]
    fn default_fee_schedule_matches_plans() {
        let tables = EngineTables::default();
        assert_eq!(
            tables.fee_schedule.get("free"),
            Some(&BigDecimal::from_str("2.5").unwrap())
        );
        assert_eq!(
            tables.fee_schedule.get("enterprise"),
            Some(&BigDecimal::from_str("1.0").unwrap())
        );
    }

    #[test]
    fn default_routing_sends_stablecoins_to_low_fee_network() {
        let tables = EngineTables::default();
        assert_eq!(tables.routing.get("USDC"), Some(&"polygon".to_string()));
        assert_eq!(tables.routing.get("ETH"), Some(&"ethereum".to_string()));
        assert_eq!(tables.routing.get("BTC"), Some(&"bitcoin".to_string()));
    }

    #[test]
    fn default_limits_descend_with_risk() {
        let tables = EngineTables::default();
        let low = &tables.risk_limits["low"];
        let high = &tables.risk_limits["high"];
        assert!(low.single_transaction > high.single_transaction);
        assert!(low.monthly > high.monthly);
    }

    #[test]
    fn loads_tables_from_json_file() {
        let tables = EngineTables::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&tables).unwrap()).unwrap();

        let cache = TableCache::load(file.path().to_str()).unwrap();
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.expiry_minutes, 15);
        assert_eq!(snapshot.networks["ethereum"].required_confirmations, 12);
    }

    #[test]
    fn load_fails_on_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(TableCache::load(file.path().to_str()).is_err());
    }
}
