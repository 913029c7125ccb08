use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;

#[derive(Debug, Deserialize, ToSchema)]
pub struct PushFeeRateRequest {
    #[schema(value_type = String)]
    pub percentage: BigDecimal,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WaiveBillingRequest {
    pub note: Option<String>,
}

/// Clear an enhanced-due-diligence hold so the payment becomes payable.
pub async fn approve_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.payments.approve_review(id).await?;
    Ok(Json(tx))
}

/// Privileged, rate-limited push of a new global fee rate to the on-chain
/// contract. Scheduled asynchronously; never touches the payment path.
pub async fn push_fee_rate(
    State(state): State<AppState>,
    Json(payload): Json<PushFeeRateRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.percentage < BigDecimal::from(0) || payload.percentage > BigDecimal::from(10) {
        return Err(AppError::Validation(
            "fee percentage must be between 0 and 10".to_string(),
        ));
    }

    state.fee_sync.schedule_push(payload.percentage);
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "scheduled" }))))
}

pub async fn waive_billing(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(payload): Json<WaiveBillingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let sub = state.billing.waive_current(merchant_id, payload.note).await?;
    Ok(Json(sub))
}
