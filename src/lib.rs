pub mod chain;
pub mod compliance;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;
pub mod validation;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::config::tables::TableCache;
use crate::services::billing::BillingService;
use crate::services::fees::FeeSyncService;
use crate::services::payments::PaymentService;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Config,
    pub tables: Arc<TableCache>,
    pub payments: PaymentService,
    pub fee_sync: FeeSyncService,
    pub billing: BillingService,
}

pub fn create_app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/payments/widget/create",
            post(handlers::payments::widget_create_payment),
        )
        .route("/payments/process", post(handlers::payments::process_payment))
        .route(
            "/payments/public/:id",
            get(handlers::payments::public_payment),
        )
        .route("/payments/:id/wallet", post(handlers::payments::set_wallet));

    let merchant_routes = Router::new()
        .route("/payments/create", post(handlers::payments::create_payment))
        .route(
            "/payments/status/:id",
            get(handlers::payments::payment_status),
        )
        .route("/payments/refund", post(handlers::payments::refund_payment))
        .route(
            "/subscriptions/plan",
            post(handlers::subscriptions::change_plan),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::merchant_auth,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/payments/:id/review",
            post(handlers::admin::approve_review),
        )
        .route("/admin/fees/rate", post(handlers::admin::push_fee_rate))
        .route(
            "/admin/subscriptions/:merchant_id/waive",
            post(handlers::admin::waive_billing),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(merchant_routes)
        .merge(admin_routes)
        .layer(axum_middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
