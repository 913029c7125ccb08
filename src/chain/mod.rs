use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub mod client;

pub use client::{ChainClient, ChainError, VerifiedPayment};

use crate::config::tables::{NetworkConfig, TableCache};
use crate::error::AppError;

/// Resolves the network for a currency and hands out per-network RPC
/// clients. Routing comes from the injected tables, so currency routes and
/// endpoints can change at runtime; clients are rebuilt when an endpoint
/// URL changes.
pub struct ChainRouter {
    tables: Arc<TableCache>,
    clients: RwLock<HashMap<String, ChainClient>>,
}

impl ChainRouter {
    pub fn new(tables: Arc<TableCache>) -> Self {
        Self {
            tables,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn network_for(&self, currency: &str) -> Result<String, AppError> {
        self.tables
            .snapshot()
            .routing
            .get(currency)
            .cloned()
            .ok_or_else(|| AppError::Validation(format!("unsupported currency: {}", currency)))
    }

    pub fn network_config(&self, network: &str) -> Result<NetworkConfig, AppError> {
        self.tables
            .snapshot()
            .networks
            .get(network)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("network '{}' is not configured", network)))
    }

    pub fn required_confirmations(&self, network: &str) -> Result<i32, AppError> {
        Ok(self.network_config(network)?.required_confirmations)
    }

    pub fn client_for(&self, network: &str) -> Result<ChainClient, AppError> {
        let config = self.network_config(network)?;

        {
            let clients = self
                .clients
                .read()
                .map_err(|_| AppError::Internal("chain client cache poisoned".to_string()))?;
            if let Some(client) = clients.get(network) {
                if client.base_url() == config.rpc_url {
                    return Ok(client.clone());
                }
            }
        }

        let client = ChainClient::new(config.rpc_url.clone(), config.value_decimals);
        let mut clients = self
            .clients
            .write()
            .map_err(|_| AppError::Internal("chain client cache poisoned".to_string()))?;
        clients.insert(network.to_string(), client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tables::EngineTables;

    fn router() -> ChainRouter {
        ChainRouter::new(TableCache::from_tables(EngineTables::default()))
    }

    #[test]
    fn routes_currencies_to_networks() {
        let router = router();
        assert_eq!(router.network_for("USDC").unwrap(), "polygon");
        assert_eq!(router.network_for("ETH").unwrap(), "ethereum");
        assert_eq!(router.network_for("BTC").unwrap(), "bitcoin");
    }

    #[test]
    fn rejects_unknown_currency() {
        let router = router();
        assert!(matches!(
            router.network_for("DOGE"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn confirmations_are_network_specific() {
        let router = router();
        assert_eq!(router.required_confirmations("ethereum").unwrap(), 12);
        assert_eq!(router.required_confirmations("bitcoin").unwrap(), 6);
    }

    #[test]
    fn caches_clients_per_network() {
        let router = router();
        let first = router.client_for("ethereum").unwrap();
        let second = router.client_for("ethereum").unwrap();
        assert_eq!(first.base_url(), second.base_url());
    }
}
