use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Stable machine-readable error codes surfaced to API callers.
pub mod codes {
    pub const KYC_NOT_APPROVED: &str = "KYC_NOT_APPROVED";
    pub const LIMIT_EXCEEDED: &str = "LIMIT_EXCEEDED";
    pub const WALLET_NOT_CONFIGURED: &str = "WALLET_NOT_CONFIGURED";
    pub const REVIEW_PENDING: &str = "REVIEW_PENDING";
    pub const DOMAIN_NOT_ALLOWED: &str = "DOMAIN_NOT_ALLOWED";
    pub const ALREADY_PROCESSED: &str = "ALREADY_PROCESSED";
    pub const NOT_REFUNDABLE: &str = "NOT_REFUNDABLE";
    pub const WALLET_ALREADY_SET: &str = "WALLET_ALREADY_SET";
    pub const TX_EXPIRED: &str = "TX_EXPIRED";
    pub const RPC_UNAVAILABLE: &str = "RPC_UNAVAILABLE";
    pub const VERIFICATION_FAILED: &str = "VERIFICATION_FAILED";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Compliance or policy rejection. Fails closed with no side effects.
    #[error("{reason}")]
    Rejected { code: &'static str, reason: String },

    /// Idempotency guard: the transaction is not in the state the
    /// operation requires.
    #[error("{reason}")]
    Conflict { code: &'static str, reason: String },

    /// Recoverable external failure; the caller may retry, state is unchanged.
    #[error("{reason}")]
    Upstream { code: &'static str, reason: String },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn rejected(code: &'static str, reason: impl Into<String>) -> Self {
        AppError::Rejected {
            code,
            reason: reason.into(),
        }
    }

    pub fn conflict(code: &'static str, reason: impl Into<String>) -> Self {
        AppError::Conflict {
            code,
            reason: reason.into(),
        }
    }

    pub fn upstream(code: &'static str, reason: impl Into<String>) -> Self {
        AppError::Upstream {
            code,
            reason: reason.into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Rejected { .. } => StatusCode::FORBIDDEN,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Upstream { code, .. } => {
                if *code == codes::VERIFICATION_FAILED {
                    StatusCode::UNPROCESSABLE_ENTITY
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Rejected { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Upstream { code, .. } => code,
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, AppError::Upstream { .. })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
            "retryable": self.retryable(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_status_code() {
        let error = AppError::rejected(codes::KYC_NOT_APPROVED, "merchant KYC not approved");
        assert_eq!(error.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(error.code(), codes::KYC_NOT_APPROVED);
        assert!(!error.retryable());
    }

    #[test]
    fn test_conflict_status_code() {
        let error = AppError::conflict(codes::ALREADY_PROCESSED, "transaction already submitted");
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
        assert_eq!(error.code(), codes::ALREADY_PROCESSED);
    }

    #[test]
    fn test_rpc_failure_is_retryable() {
        let error = AppError::upstream(codes::RPC_UNAVAILABLE, "connection refused");
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
        assert!(error.retryable());
    }

    #[test]
    fn test_verification_failure_status_code() {
        let error = AppError::upstream(codes::VERIFICATION_FAILED, "receipt status 0x0");
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(error.retryable());
    }

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation("amount must be greater than zero".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_database_error_status_code() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_rejection_response_body() {
        let error = AppError::rejected(codes::LIMIT_EXCEEDED, "daily limit exceeded");
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_not_found_response() {
        let error = AppError::NotFound("transaction not found".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
