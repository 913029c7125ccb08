use axum::{Extension, Json, extract::State, response::IntoResponse};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::auth::AuthedMerchant;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePlanRequest {
    pub plan: String,
}

pub async fn change_plan(
    State(state): State<AppState>,
    Extension(AuthedMerchant(merchant)): Extension<AuthedMerchant>,
    Json(payload): Json<ChangePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    let sub = state.billing.change_plan(merchant.id, &payload.plan).await?;
    Ok(Json(sub))
}
