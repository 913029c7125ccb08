use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chainpay_core::chain::ChainRouter;
use chainpay_core::config::Config;
use chainpay_core::config::tables::TableCache;
use chainpay_core::db;
use chainpay_core::services::billing::BillingService;
use chainpay_core::services::fees::{FeeEngine, FeeSyncService};
use chainpay_core::services::monitor::ConfirmationMonitor;
use chainpay_core::services::notifier::NotificationEmitter;
use chainpay_core::services::payments::PaymentService;
use chainpay_core::services::rates::FixedRateProvider;
use chainpay_core::{AppState, create_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    config.validate()?;

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database pool and migrations
    let pool = db::create_pool(&config).await?;
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    // Policy tables: file-backed with background refresh, defaults otherwise
    let tables = TableCache::load(config.tables_path.as_deref())?;
    tables.start_refresher(Duration::from_secs(config.tables_refresh_secs));

    let router = Arc::new(ChainRouter::new(tables.clone()));
    let notifier = NotificationEmitter::new(&config);
    let fee_sync = FeeSyncService::new(config.fee_sync_url.clone(), config.webhook_secret.clone());
    let payments = PaymentService::new(
        pool.clone(),
        tables.clone(),
        router.clone(),
        Arc::new(FixedRateProvider::new(tables.clone())),
        FeeEngine::new(tables.clone()),
        notifier,
    );
    let billing = BillingService::new(pool.clone(), tables.clone(), fee_sync.clone());

    // Background jobs: confirmation monitor (plus expiry sweep) and billing
    ConfirmationMonitor::new(
        pool.clone(),
        router,
        payments.clone(),
        Duration::from_secs(config.monitor_interval_secs),
    )
    .spawn();
    billing.clone().spawn(config.billing_cron.clone());
    tracing::info!("Background jobs started");

    let app_state = AppState {
        db: pool,
        config: config.clone(),
        tables,
        payments,
        fee_sync,
        billing,
    };
    let app = create_app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
