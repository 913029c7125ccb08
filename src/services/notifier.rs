use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;

use crate::config::Config;
use crate::db::models::Transaction;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_CREATED: &str = "payment.created";
pub const EVENT_PROCESSING: &str = "payment.processing";
pub const EVENT_COMPLETED: &str = "payment.completed";
pub const EVENT_REFUNDED: &str = "payment.refunded";

/// HMAC-SHA256 signature for outbound payloads, hex encoded.
pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Best-effort emitter for lifecycle events. Every send is spawned and
/// swallowed on failure: a dead notification service must never roll back
/// or delay a payment transition.
#[derive(Clone)]
pub struct NotificationEmitter {
    http: reqwest::Client,
    notification_url: Option<String>,
    email_service_url: Option<String>,
    conversion_service_url: Option<String>,
    secret: String,
}

impl NotificationEmitter {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            http,
            notification_url: config.notification_url.clone(),
            email_service_url: config.email_service_url.clone(),
            conversion_service_url: config.conversion_service_url.clone(),
            secret: config.webhook_secret.clone(),
        }
    }

    fn event_payload(event: &str, tx: &Transaction) -> serde_json::Value {
        json!({
            "event": event,
            "transaction": {
                "id": tx.id,
                "merchant_id": tx.merchant_id,
                "status": tx.status,
                "amount": tx.amount.to_string(),
                "currency": tx.currency,
                "crypto_amount": tx.crypto_amount.to_string(),
                "network": tx.network,
                "tx_hash": tx.tx_hash,
                "created_at": tx.created_at,
            }
        })
    }

    pub fn emit(&self, event: &'static str, tx: &Transaction) {
        let Some(url) = self.notification_url.clone() else {
            return;
        };
        let body = Self::event_payload(event, tx).to_string();
        self.deliver("notification", event, url, body);
    }

    pub fn email(&self, event: &'static str, tx: &Transaction) {
        let Some(url) = self.email_service_url.clone() else {
            return;
        };
        let body = json!({
            "event": event,
            "transaction_id": tx.id,
            "to": tx.customer_email,
        })
        .to_string();
        self.deliver("email", event, url, body);
    }

    /// Auto-conversion eligibility check fired when a payment completes.
    pub fn conversion_check(&self, tx: &Transaction) {
        let Some(url) = self.conversion_service_url.clone() else {
            return;
        };
        let body = json!({
            "transaction_id": tx.id,
            "merchant_id": tx.merchant_id,
            "currency": tx.currency,
            "crypto_amount": tx.crypto_amount.to_string(),
        })
        .to_string();
        self.deliver("conversion", "conversion.check", url, body);
    }

    fn deliver(&self, kind: &'static str, event: &'static str, url: String, body: String) {
        let signature = sign_payload(&self.secret, &body);
        let http = self.http.clone();

        tokio::spawn(async move {
            let result = http
                .post(&url)
                .header("Content-Type", "application/json")
                .header("X-Signature", signature)
                .body(body)
                .send()
                .await;

            match result {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(kind, event, status = %response.status(), "emit rejected");
                }
                Err(e) => {
                    tracing::warn!(kind, event, "emit failed: {}", e);
                }
                _ => {
                    tracing::debug!(kind, event, "emit delivered");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{
        ComplianceSnapshot, LimitSnapshot, RISK_LOW, Transaction, TransactionDraft,
    };
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_tx() -> Transaction {
        Transaction::new(TransactionDraft {
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
                risk_level: RISK_LOW.to_string(),
                aml_report: String::new(),
                edd_required: false,
                edd_approved: false,
                limits: LimitSnapshot {
                    single_transaction: BigDecimal::from(10_000),
                    daily: BigDecimal::from(50_000),
                    monthly: BigDecimal::from(500_000),
                },
            },
            requires_review: false,
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        })
    }

    #[test]
    fn signature_is_deterministic_hex() {
        let first = sign_payload("secret", "body");
        let second = sign_payload("secret", "body");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_depends_on_secret_and_body() {
        let base = sign_payload("secret", "body");
        assert_ne!(sign_payload("other", "body"), base);
        assert_ne!(sign_payload("secret", "other"), base);
    }

    #[test]
    fn event_payload_carries_lifecycle_fields() {
        let tx = sample_tx();
        let payload = NotificationEmitter::event_payload(EVENT_CREATED, &tx);

        assert_eq!(payload["event"], EVENT_CREATED);
        assert_eq!(payload["transaction"]["status"], "pending");
        assert_eq!(payload["transaction"]["amount"], "100");
        assert_eq!(payload["transaction"]["network"], "polygon");
        assert!(payload["transaction"]["tx_hash"].is_null());
    }
}
