use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::AppState;
use crate::db::models::Merchant;
use crate::db::queries;
use crate::error::AppError;

/// API keys are stored as SHA-256 digests; the plaintext key never touches
/// the database.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// The authenticated merchant, inserted into request extensions for
/// downstream handlers.
#[derive(Clone)]
pub struct AuthedMerchant(pub Merchant);

fn bearer_token(value: Option<&str>) -> Option<&str> {
    let value = value?;
    Some(value.strip_prefix("Bearer ").unwrap_or(value))
}

pub async fn merchant_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());
    let token = bearer_token(header)
        .ok_or_else(|| AppError::Unauthorized("missing API key".to_string()))?
        .to_string();

    let merchant = queries::get_merchant_by_api_key_hash(&state.db, &hash_api_key(&token))
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid API key".to_string()))?;

    req.extensions_mut().insert(AuthedMerchant(merchant));
    Ok(next.run(req).await)
}

pub fn admin_token_matches(header: Option<&str>, expected: &str) -> bool {
    match header {
        Some(value) => value == format!("Bearer {}", expected) || value == expected,
        None => false,
    }
}

pub async fn admin_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    if admin_token_matches(header, &state.config.admin_api_key) {
        Ok(next.run(req).await)
    } else {
        Err(AppError::Unauthorized("admin key required".to_string()))
    }
}
