use bigdecimal::BigDecimal;
use std::fmt;

pub const CURRENCY_MAX_LEN: usize = 8;
pub const EMAIL_MAX_LEN: usize = 255;
pub const REASON_MAX_LEN: usize = 500;
pub const ALLOWED_CURRENCIES: &[&str] = &["USDC", "USDT", "DAI", "ETH", "BTC"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for crate::error::AppError {
    fn from(err: ValidationError) -> Self {
        crate::error::AppError::Validation(err.to_string())
    }
}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_currency(currency: &str) -> ValidationResult {
    let currency = sanitize_string(currency);
    validate_required("currency", &currency)?;
    validate_max_len("currency", &currency, CURRENCY_MAX_LEN)?;

    if ALLOWED_CURRENCIES.iter().all(|candidate| currency != *candidate) {
        return Err(ValidationError::new(
            "currency",
            format!("must be one of: {}", ALLOWED_CURRENCIES.join(", ")),
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_email(email: &str) -> ValidationResult {
    let email = sanitize_string(email);
    validate_required("email", &email)?;
    validate_max_len("email", &email, EMAIL_MAX_LEN)?;

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ValidationError::new("email", "must contain '@'"));
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(ValidationError::new("email", "is not a valid address"));
    }

    Ok(())
}

fn is_evm_address(value: &str) -> bool {
    value.len() == 42
        && value.starts_with("0x")
        && value[2..].chars().all(|ch| ch.is_ascii_hexdigit())
}

fn is_bitcoin_address(value: &str) -> bool {
    (26..=62).contains(&value.len()) && value.chars().all(|ch| ch.is_ascii_alphanumeric())
}

/// Wallet shape check for the network a payment settles on. EVM networks
/// use 0x-prefixed 20-byte hex; bitcoin uses base58/bech32 strings.
pub fn validate_wallet_address(network: &str, address: &str) -> ValidationResult {
    let address = sanitize_string(address);
    validate_required("wallet_address", &address)?;

    let ok = match network {
        "bitcoin" => is_bitcoin_address(&address),
        _ => is_evm_address(&address),
    };

    if !ok {
        return Err(ValidationError::new(
            "wallet_address",
            format!("is not a valid address for network '{}'", network),
        ));
    }

    Ok(())
}

pub fn validate_tx_hash(network: &str, tx_hash: &str) -> ValidationResult {
    let tx_hash = sanitize_string(tx_hash);
    validate_required("tx_hash", &tx_hash)?;

    let hex_part = match network {
        "bitcoin" => tx_hash.as_str(),
        _ => {
            if !tx_hash.starts_with("0x") {
                return Err(ValidationError::new("tx_hash", "must start with 0x"));
            }
            &tx_hash[2..]
        }
    };

    if hex_part.len() != 64 || !hex_part.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(ValidationError::new(
            "tx_hash",
            "must be a 32-byte hex string",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const EVM_ADDR: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
    }

    #[test]
    fn validates_currency_codes() {
        assert!(validate_currency("USDC").is_ok());
        assert!(validate_currency("  BTC  ").is_ok());
        assert!(validate_currency("usdc").is_err());
        assert!(validate_currency("DOGE").is_err());
        assert!(validate_currency("").is_err());
    }

    #[test]
    fn validates_positive_amount() {
        let positive = BigDecimal::from_str("1.23").expect("valid decimal");
        assert!(validate_positive_amount(&positive).is_ok());
        assert!(validate_positive_amount(&BigDecimal::from(0)).is_err());
        assert!(validate_positive_amount(&BigDecimal::from(-1)).is_err());
    }

    #[test]
    fn validates_email_shape() {
        assert!(validate_email("payer@example.com").is_ok());
        assert!(validate_email("payer@localhost").is_err());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("@example.com").is_err());
    }

    #[test]
    fn validates_evm_wallets() {
        assert!(validate_wallet_address("polygon", EVM_ADDR).is_ok());
        assert!(validate_wallet_address("ethereum", "0x123").is_err());
        assert!(validate_wallet_address("ethereum", &EVM_ADDR[2..]).is_err());
    }

    #[test]
    fn validates_bitcoin_wallets() {
        assert!(validate_wallet_address("bitcoin", "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq").is_ok());
        assert!(validate_wallet_address("bitcoin", "short").is_err());
    }

    #[test]
    fn validates_tx_hashes() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert!(validate_tx_hash("ethereum", &hash).is_ok());
        assert!(validate_tx_hash("ethereum", &hash[2..]).is_err());
        assert!(validate_tx_hash("bitcoin", &"ab".repeat(32)).is_ok());
        assert!(validate_tx_hash("ethereum", "0x1234").is_err());
    }
}
