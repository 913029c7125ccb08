use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

pub mod tables;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub admin_api_key: String,
    pub webhook_secret: String,
    pub notification_url: Option<String>,
    pub email_service_url: Option<String>,
    pub conversion_service_url: Option<String>,
    pub fee_sync_url: Option<String>,
    pub tables_path: Option<String>,
    pub tables_refresh_secs: u64,
    pub monitor_interval_secs: u64,
    pub billing_cron: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            admin_api_key: env::var("ADMIN_API_KEY")?,
            webhook_secret: env::var("WEBHOOK_SECRET")?,
            notification_url: env::var("NOTIFICATION_URL").ok(),
            email_service_url: env::var("EMAIL_SERVICE_URL").ok(),
            conversion_service_url: env::var("CONVERSION_SERVICE_URL").ok(),
            fee_sync_url: env::var("FEE_SYNC_URL").ok(),
            tables_path: env::var("PAYMENT_TABLES_PATH").ok(),
            tables_refresh_secs: env::var("PAYMENT_TABLES_REFRESH_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            monitor_interval_secs: env::var("MONITOR_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            billing_cron: env::var("BILLING_CRON").unwrap_or_else(|_| "0 0 * * * *".to_string()),
        })
    }

    /// Validate the parts of the config that would otherwise fail deep
    /// inside a background task.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_port == 0 {
            anyhow::bail!("SERVER_PORT must be greater than 0");
        }
        if self.webhook_secret.is_empty() {
            anyhow::bail!("WEBHOOK_SECRET is empty");
        }
        for (name, value) in [
            ("NOTIFICATION_URL", &self.notification_url),
            ("EMAIL_SERVICE_URL", &self.email_service_url),
            ("CONVERSION_SERVICE_URL", &self.conversion_service_url),
            ("FEE_SYNC_URL", &self.fee_sync_url),
        ] {
            if let Some(value) = value {
                url::Url::parse(value)
                    .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
            }
        }
        use std::str::FromStr;
        cron::Schedule::from_str(&self.billing_cron)
            .map_err(|e| anyhow::anyhow!("BILLING_CRON is not a valid cron expression: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server_port: 3000,
            database_url: "postgres://localhost:5432/payments".to_string(),
            admin_api_key: "admin-key".to_string(),
            webhook_secret: "secret".to_string(),
            notification_url: None,
            email_service_url: None,
            conversion_service_url: None,
            fee_sync_url: None,
            tables_path: None,
            tables_refresh_secs: 60,
            monitor_interval_secs: 30,
            billing_cron: "0 0 * * * *".to_string(),
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_empty_webhook_secret() {
        let mut config = base_config();
        config.webhook_secret = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_notification_url() {
        let mut config = base_config();
        config.notification_url = Some("not-a-url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_billing_cron() {
        let mut config = base_config();
        config.billing_cron = "whenever".to_string();
        assert!(config.validate().is_err());
    }
}
