use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::{BigDecimal, Json};
use uuid::Uuid;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_REFUNDED: &str = "refunded";

pub const KYC_APPROVED: &str = "approved";

pub const PLAN_FREE: &str = "free";
pub const PLANS: &[&str] = &["free", "starter", "professional", "enterprise"];

pub const RISK_LOW: &str = "low";
pub const RISK_MEDIUM: &str = "medium";
pub const RISK_HIGH: &str = "high";

pub const BILLING_PAID: &str = "paid";
pub const BILLING_PENDING: &str = "pending";
pub const BILLING_FAILED: &str = "failed";
pub const BILLING_WAIVED: &str = "waived";

/// The payment state machine. `pending` and `processing` may fail;
/// completion is reached only through `processing`; refunds only from
/// `completed`. Every persisted transition is guarded on these edges.
pub fn can_transition(from: &str, to: &str) -> bool {
    matches!(
        (from, to),
        (STATUS_PENDING, STATUS_PROCESSING)
            | (STATUS_PENDING, STATUS_FAILED)
            | (STATUS_PROCESSING, STATUS_COMPLETED)
            | (STATUS_PROCESSING, STATUS_FAILED)
            | (STATUS_COMPLETED, STATUS_REFUNDED)
    )
}

pub fn risk_rank(level: &str) -> u8 {
    match level {
        RISK_HIGH => 2,
        RISK_MEDIUM => 1,
        _ => 0,
    }
}

/// Immutable audit record written once by the compliance gate before the
/// transaction is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceSnapshot {
    pub kyc_verified: bool,
    pub aml_checked: bool,
    pub risk_score: i32,
    pub risk_level: String,
    pub aml_report: String,
    pub edd_required: bool,
    pub edd_approved: bool,
    pub limits: LimitSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSnapshot {
    pub single_transaction: BigDecimal,
    pub daily: BigDecimal,
    pub monthly: BigDecimal,
}

#[derive(Debug, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub customer_email: Option<String>,
    pub customer_wallet: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub crypto_amount: BigDecimal,
    pub exchange_rate: BigDecimal,
    pub network: String,
    pub to_address: String,
    pub tx_hash: Option<String>,
    pub from_address: Option<String>,
    pub block_number: Option<i64>,
    pub gas_used: Option<BigDecimal>,
    pub gas_price: Option<BigDecimal>,
    pub confirmation_count: i32,
    pub required_confirmations: i32,
    pub status: String,
    pub compliance: Json<ComplianceSnapshot>,
    pub platform_fee: Option<BigDecimal>,
    pub platform_fee_percentage: Option<BigDecimal>,
    pub merchant_plan: Option<String>,
    pub merchant_amount: Option<BigDecimal>,
    pub refund_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub requires_review: bool,
    pub review_cleared_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Request-time fields assembled by the payment service after compliance
/// screening and rate resolution.
#[derive(Debug)]
pub struct TransactionDraft {
    pub merchant_id: Uuid,
    pub customer_email: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub crypto_amount: BigDecimal,
    pub exchange_rate: BigDecimal,
    pub network: String,
    pub to_address: String,
    pub required_confirmations: i32,
    pub compliance: ComplianceSnapshot,
    pub requires_review: bool,
    pub expires_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(draft: TransactionDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            merchant_id: draft.merchant_id,
            customer_email: draft.customer_email,
            customer_wallet: None,
            amount: draft.amount,
            currency: draft.currency,
            crypto_amount: draft.crypto_amount,
            exchange_rate: draft.exchange_rate,
            network: draft.network,
            to_address: draft.to_address,
            tx_hash: None,
            from_address: None,
            block_number: None,
            gas_used: None,
            gas_price: None,
            confirmation_count: 0,
            required_confirmations: draft.required_confirmations,
            status: STATUS_PENDING.to_string(),
            compliance: Json(draft.compliance),
            platform_fee: None,
            platform_fee_percentage: None,
            merchant_plan: None,
            merchant_amount: None,
            refund_reason: None,
            refunded_at: None,
            failure_reason: None,
            requires_review: draft.requires_review,
            review_cleared_at: None,
            created_at: now,
            processed_at: None,
            completed_at: None,
            updated_at: now,
            expires_at: draft.expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == STATUS_PENDING && self.expires_at < now
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Merchant {
    pub id: Uuid,
    pub business_name: String,
    pub email: String,
    pub kyc_status: String,
    pub risk_level: String,
    pub wallet_address: Option<String>,
    pub api_key_hash: String,
    pub allowed_domains: Vec<String>,
    pub edd_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub plan: String,
    pub amount: BigDecimal,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow, Serialize, Deserialize)]
pub struct BillingRecord {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub amount: BigDecimal,
    pub status: String,
    pub note: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn snapshot() -> ComplianceSnapshot {
        ComplianceSnapshot {
            kyc_verified: true,
            aml_checked: true,
            risk_score: 15,
            risk_level: RISK_LOW.to_string(),
            aml_report: "amount below reporting thresholds".to_string(),
            edd_required: false,
            edd_approved: false,
            limits: LimitSnapshot {
                single_transaction: BigDecimal::from(10_000),
                daily: BigDecimal::from(50_000),
                monthly: BigDecimal::from(500_000),
            },
        }
    }

    fn draft() -> TransactionDraft {
        TransactionDraft {
            merchant_id: Uuid::new_v4(),
            customer_email: Some("payer@example.com".to_string()),
            amount: BigDecimal::from(100),
            currency: "USDC".to_string(),
            crypto_amount: BigDecimal::from(100),
            exchange_rate: BigDecimal::from(1),
            network: "polygon".to_string(),
            to_address: "0x52908400098527886E0F7030069857D2E4169EE7".to_string(),
            required_confirmations: 15,
            compliance: snapshot(),
            requires_review: false,
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        }
    }

    #[test]
    fn new_transaction_starts_pending() {
        let tx = Transaction::new(draft());
        assert_eq!(tx.status, STATUS_PENDING);
        assert_eq!(tx.confirmation_count, 0);
        assert!(tx.tx_hash.is_none());
        assert!(tx.platform_fee.is_none());
        assert!(tx.processed_at.is_none());
        assert!(tx.completed_at.is_none());
    }

    #[test]
    fn allowed_transitions_only() {
        assert!(can_transition(STATUS_PENDING, STATUS_PROCESSING));
        assert!(can_transition(STATUS_PENDING, STATUS_FAILED));
        assert!(can_transition(STATUS_PROCESSING, STATUS_COMPLETED));
        assert!(can_transition(STATUS_PROCESSING, STATUS_FAILED));
        assert!(can_transition(STATUS_COMPLETED, STATUS_REFUNDED));

        // No skipping and no backwards edges.
        assert!(!can_transition(STATUS_PENDING, STATUS_COMPLETED));
        assert!(!can_transition(STATUS_PENDING, STATUS_REFUNDED));
        assert!(!can_transition(STATUS_PROCESSING, STATUS_PENDING));
        assert!(!can_transition(STATUS_PROCESSING, STATUS_REFUNDED));
        assert!(!can_transition(STATUS_COMPLETED, STATUS_PROCESSING));
        assert!(!can_transition(STATUS_FAILED, STATUS_PENDING));
        assert!(!can_transition(STATUS_REFUNDED, STATUS_COMPLETED));
    }

    #[test]
    fn risk_rank_orders_levels() {
        assert!(risk_rank(RISK_HIGH) > risk_rank(RISK_MEDIUM));
        assert!(risk_rank(RISK_MEDIUM) > risk_rank(RISK_LOW));
        assert_eq!(risk_rank("unknown"), risk_rank(RISK_LOW));
    }

    #[test]
    fn expiry_applies_to_pending_only() {
        let mut tx = Transaction::new(draft());
        tx.expires_at = Utc::now() - chrono::Duration::minutes(1);
        assert!(tx.is_expired(Utc::now()));

        tx.status = STATUS_PROCESSING.to_string();
        assert!(!tx.is_expired(Utc::now()));
    }

    #[test]
    fn compliance_snapshot_round_trips_as_json() {
        let snap = snapshot();
        let raw = serde_json::to_string(&snap).unwrap();
        let parsed: ComplianceSnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.risk_level, RISK_LOW);
        assert_eq!(
            parsed.limits.single_transaction,
            BigDecimal::from_str("10000").unwrap()
        );
    }
}
