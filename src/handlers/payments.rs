use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::AppState;
use crate::db::models::Transaction;
use crate::db::queries;
use crate::error::{AppError, codes};
use crate::middleware::auth::{AuthedMerchant, hash_api_key};
use crate::services::payments::{CreatePaymentInput, ProcessPaymentInput, RefundInput};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub currency: String,
    pub customer_email: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProcessPaymentRequest {
    pub transaction_id: Uuid,
    pub tx_hash: String,
    pub from_address: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundRequest {
    pub transaction_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetWalletRequest {
    pub wallet_address: String,
}

/// The unauthenticated view: enough for a payer-facing status page,
/// nothing merchant- or compliance-internal.
#[derive(Debug, Serialize, ToSchema)]
pub struct PublicPayment {
    pub id: Uuid,
    pub status: String,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub currency: String,
    #[schema(value_type = String)]
    pub crypto_amount: BigDecimal,
    pub network: String,
    pub to_address: String,
    pub confirmation_count: i32,
    pub required_confirmations: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<Transaction> for PublicPayment {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            status: tx.status,
            amount: tx.amount,
            currency: tx.currency,
            crypto_amount: tx.crypto_amount,
            network: tx.network,
            to_address: tx.to_address,
            confirmation_count: tx.confirmation_count,
            required_confirmations: tx.required_confirmations,
            created_at: tx.created_at,
            expires_at: tx.expires_at,
        }
    }
}

pub async fn create_payment(
    State(state): State<AppState>,
    Extension(AuthedMerchant(merchant)): Extension<AuthedMerchant>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state
        .payments
        .create(
            &merchant,
            CreatePaymentInput {
                amount: payload.amount,
                currency: payload.currency,
                customer_email: payload.customer_email,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(tx)))
}

/// Widget path: API key header plus an Origin whitelisted for the merchant.
pub async fn widget_create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing API key".to_string()))?;

    let merchant = queries::get_merchant_by_api_key_hash(&state.db, &hash_api_key(api_key))
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid API key".to_string()))?;

    let origin = headers
        .get("origin")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::rejected(codes::DOMAIN_NOT_ALLOWED, "missing Origin header"))?;
    let host = url::Url::parse(origin)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| AppError::rejected(codes::DOMAIN_NOT_ALLOWED, "invalid Origin header"))?;

    if !merchant
        .allowed_domains
        .iter()
        .any(|domain| domain == "*" || domain.eq_ignore_ascii_case(&host))
    {
        return Err(AppError::rejected(
            codes::DOMAIN_NOT_ALLOWED,
            format!("domain '{}' is not whitelisted for this merchant", host),
        ));
    }

    let tx = state
        .payments
        .create(
            &merchant,
            CreatePaymentInput {
                amount: payload.amount,
                currency: payload.currency,
                customer_email: payload.customer_email,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn process_payment(
    State(state): State<AppState>,
    Json(payload): Json<ProcessPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state
        .payments
        .process(ProcessPaymentInput {
            transaction_id: payload.transaction_id,
            tx_hash: payload.tx_hash,
            from_address: payload.from_address,
        })
        .await?;

    Ok(Json(tx))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Extension(AuthedMerchant(merchant)): Extension<AuthedMerchant>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.payments.status(merchant.id, id).await?;
    Ok(Json(tx))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    Extension(AuthedMerchant(merchant)): Extension<AuthedMerchant>,
    Json(payload): Json<RefundRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state
        .payments
        .refund(
            merchant.id,
            RefundInput {
                transaction_id: payload.transaction_id,
                reason: payload.reason,
            },
        )
        .await?;

    Ok(Json(tx))
}

pub async fn public_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.payments.public_view(id).await?;
    Ok(Json(PublicPayment::from(tx)))
}

pub async fn set_wallet(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetWalletRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state
        .payments
        .set_customer_wallet(id, &payload.wallet_address)
        .await?;

    Ok(Json(PublicPayment::from(tx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ComplianceSnapshot, LimitSnapshot, TransactionDraft};

    #[test]
    fn public_view_hides_merchant_fields() {
        let tx = Transaction::new(TransactionDraft {
            merchant_id: Uuid::new_v4(),
            customer_email: Some("payer@example.com".to_string()),
            amount: BigDecimal::from(100),
            currency: "USDC".to_string(),
            crypto_amount: BigDecimal::from(100),
            exchange_rate: BigDecimal::from(1),
            network: "polygon".to_string(),
            to_address: "0x52908400098527886E0F7030069857D2E4169EE7".to_string(),
            required_confirmations: 15,
            compliance: ComplianceSnapshot {
                kyc_verified: true,
                aml_checked: true,
                risk_score: 15,
                risk_level: "low".to_string(),
                aml_report: "internal".to_string(),
                edd_required: false,
                edd_approved: false,
                limits: LimitSnapshot {
                    single_transaction: BigDecimal::from(10_000),
                    daily: BigDecimal::from(50_000),
                    monthly: BigDecimal::from(500_000),
                },
            },
            requires_review: false,
            expires_at: Utc::now(),
        });

        let view = PublicPayment::from(tx);
        let raw = serde_json::to_value(&view).unwrap();

        assert_eq!(raw["status"], "pending");
        assert!(raw.get("customer_email").is_none());
        assert!(raw.get("compliance").is_none());
        assert!(raw.get("merchant_id").is_none());
    }
}
