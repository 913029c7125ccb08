use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chain::ChainRouter;
use crate::db::queries;
use crate::services::payments::PaymentService;

const BATCH_LIMIT: i64 = 100;

/// Background driver for the processing -> completed transition. Runs on a
/// fixed interval so confirmed payments complete without any client
/// polling; the same pass sweeps expired pending payments to failed.
pub struct ConfirmationMonitor {
    db: PgPool,
    router: Arc<ChainRouter>,
    payments: PaymentService,
    interval: Duration,
}

impl ConfirmationMonitor {
    pub fn new(
        db: PgPool,
        router: Arc<ChainRouter>,
        payments: PaymentService,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            router,
            payments,
            interval,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(self) {
        info!("confirmation monitor started");

        loop {
            if let Err(e) = self.poll_once().await {
                error!("confirmation monitor pass failed: {}", e);
            }
            sleep(self.interval).await;
        }
    }

    /// One monitor pass. Chain height is fetched once per network; an
    /// unreachable network skips its transactions without touching state.
    pub async fn poll_once(&self) -> anyhow::Result<()> {
        let expired = queries::expire_stale(&self.db).await?;
        if expired > 0 {
            info!(count = expired, "expired stale pending transactions");
        }

        let processing = queries::list_processing(&self.db, BATCH_LIMIT).await?;
        if processing.is_empty() {
            return Ok(());
        }

        let mut heights: HashMap<String, Option<u64>> = HashMap::new();

        for tx in &processing {
            if !heights.contains_key(&tx.network) {
                let height = self.fetch_height(&tx.network).await;
                heights.insert(tx.network.clone(), height);
            }
            let Some(current) = heights.get(&tx.network).copied().flatten() else {
                continue;
            };
            let Some(recorded) = tx.block_number else {
                continue;
            };

            let confs = confirmations(current, recorded);
            if confs >= tx.required_confirmations {
                match self.payments.complete(tx, confs).await {
                    Ok(Some(_)) => {}
                    Ok(None) => debug!(transaction_id = %tx.id, "already completed"),
                    Err(e) => warn!(transaction_id = %tx.id, "completion failed: {}", e),
                }
            } else if let Err(e) = queries::record_confirmation(&self.db, tx.id, confs).await {
                warn!(transaction_id = %tx.id, "confirmation update failed: {}", e);
            }
        }

        Ok(())
    }

    async fn fetch_height(&self, network: &str) -> Option<u64> {
        let client = match self.router.client_for(network) {
            Ok(client) => client,
            Err(e) => {
                warn!(network, "no chain client: {}", e);
                return None;
            }
        };
        match client.block_number().await {
            Ok(height) => Some(height),
            Err(e) => {
                warn!(network, "failed to fetch chain height: {}", e);
                None
            }
        }
    }
}

/// Confirmations counted inclusively: a transaction in the latest block has
/// one confirmation.
pub fn confirmations(current_block: u64, recorded_block: i64) -> i32 {
    if recorded_block < 0 {
        return 0;
    }
    let recorded = recorded_block as u64;
    if current_block < recorded {
        return 0;
    }
    (current_block - recorded + 1).min(i32::MAX as u64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_block_counts_one_confirmation() {
        assert_eq!(confirmations(100, 100), 1);
    }

    #[test]
    fn counts_blocks_mined_on_top() {
        assert_eq!(confirmations(112, 101), 12);
    }

    #[test]
    fn future_block_counts_zero() {
        assert_eq!(confirmations(100, 101), 0);
        assert_eq!(confirmations(100, -1), 0);
    }
}
