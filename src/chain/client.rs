use bigdecimal::BigDecimal;
use bigdecimal::num_bigint::BigInt;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{Config, Error as FailsafeError, StateMachine, backoff, failure_policy};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

use crate::error::{AppError, codes};

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("RPC request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Transaction not found: {0}")]
    TxNotFound(String),
    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),
    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),
    #[error("Verification failed: {0}")]
    Verification(String),
}

impl From<ChainError> for AppError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Verification(_) | ChainError::TxNotFound(_) => {
                AppError::upstream(codes::VERIFICATION_FAILED, err.to_string())
            }
            _ => AppError::upstream(codes::RPC_UNAVAILABLE, err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub block_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub status: Option<String>,
    pub gas_used: Option<String>,
    pub effective_gas_price: Option<String>,
    pub block_number: Option<String>,
}

/// Chain metadata extracted from a successfully verified payment.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub from_address: String,
    pub block_number: i64,
    pub paid_amount: BigDecimal,
    pub gas_used: Option<BigDecimal>,
    pub gas_price: Option<BigDecimal>,
}

/// JSON-RPC client for one network's endpoint.
#[derive(Clone)]
pub struct ChainClient {
    client: Client,
    base_url: String,
    value_decimals: i64,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl ChainClient {
    pub fn new(base_url: String, value_decimals: i64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(Duration::from_secs(60), Duration::from_secs(120));
        let policy = failure_policy::consecutive_failures(3, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        ChainClient {
            client,
            base_url,
            value_decimals,
            circuit_breaker,
        }
    }

    pub fn with_circuit_breaker(
        base_url: String,
        value_decimals: i64,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        ChainClient {
            client,
            base_url,
            value_decimals,
            circuit_breaker,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn rpc(&self, method: &'static str, params: Value) -> Result<Value, ChainError> {
        let client = self.client.clone();
        let url = self.base_url.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .post(&url)
                    .json(&json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "method": method,
                        "params": params,
                    }))
                    .send()
                    .await?;

                let envelope = response.json::<RpcEnvelope>().await?;
                if let Some(error) = envelope.error {
                    return Err(ChainError::Rpc {
                        code: error.code,
                        message: error.message,
                    });
                }
                envelope
                    .result
                    .ok_or_else(|| ChainError::InvalidResponse("missing result".to_string()))
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(ChainError::CircuitOpen(format!(
                "RPC circuit breaker is open for {}",
                self.base_url
            ))),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let result = self.rpc("eth_blockNumber", json!([])).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ChainError::InvalidResponse("block number is not a string".into()))?;
        parse_quantity(raw)
    }

    pub async fn get_transaction(&self, tx_hash: &str) -> Result<RpcTransaction, ChainError> {
        let result = self.rpc("eth_getTransactionByHash", json!([tx_hash])).await?;
        if result.is_null() {
            return Err(ChainError::TxNotFound(tx_hash.to_string()));
        }
        serde_json::from_value(result).map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }

    pub async fn get_receipt(&self, tx_hash: &str) -> Result<Option<RpcReceipt>, ChainError> {
        let result = self
            .rpc("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }

    /// Confirm that `tx_hash` pays at least `expected_amount` to
    /// `expected_to` and succeeded on chain. Fails closed: any ambiguity is
    /// a verification failure and the caller must not advance state.
    pub async fn verify_payment(
        &self,
        tx_hash: &str,
        expected_to: &str,
        expected_amount: &BigDecimal,
    ) -> Result<VerifiedPayment, ChainError> {
        let tx = self.get_transaction(tx_hash).await?;

        let to = tx
            .to
            .ok_or_else(|| ChainError::Verification("transaction has no recipient".into()))?;
        if !to.eq_ignore_ascii_case(expected_to) {
            return Err(ChainError::Verification(format!(
                "recipient {} does not match expected {}",
                to, expected_to
            )));
        }

        let paid_amount = hex_value_to_decimal(&tx.value, self.value_decimals)?;
        if &paid_amount < expected_amount {
            return Err(ChainError::Verification(format!(
                "paid amount {} is below expected {}",
                paid_amount, expected_amount
            )));
        }

        let receipt = self
            .get_receipt(tx_hash)
            .await?
            .ok_or_else(|| ChainError::Verification("receipt not yet available".into()))?;

        if receipt.status.as_deref() != Some("0x1") {
            return Err(ChainError::Verification(format!(
                "receipt status is {}",
                receipt.status.as_deref().unwrap_or("missing")
            )));
        }

        let block_number = receipt
            .block_number
            .or(tx.block_number)
            .ok_or_else(|| ChainError::Verification("transaction not yet mined".into()))?;
        let block_number = parse_quantity(&block_number)? as i64;

        let gas_used = receipt
            .gas_used
            .as_deref()
            .map(quantity_to_decimal)
            .transpose()?;
        let gas_price = receipt
            .effective_gas_price
            .as_deref()
            .map(quantity_to_decimal)
            .transpose()?;

        Ok(VerifiedPayment {
            from_address: tx.from,
            block_number,
            paid_amount,
            gas_used,
            gas_price,
        })
    }
}

fn strip_hex(raw: &str) -> &str {
    raw.strip_prefix("0x").unwrap_or(raw)
}

pub fn parse_quantity(raw: &str) -> Result<u64, ChainError> {
    u64::from_str_radix(strip_hex(raw), 16)
        .map_err(|_| ChainError::InvalidResponse(format!("bad quantity: {}", raw)))
}

/// Convert a hex chain value into a decimal amount in whole units.
pub fn hex_value_to_decimal(raw: &str, decimals: i64) -> Result<BigDecimal, ChainError> {
    let value = u128::from_str_radix(strip_hex(raw), 16)
        .map_err(|_| ChainError::InvalidResponse(format!("bad value: {}", raw)))?;
    Ok(BigDecimal::new(BigInt::from(value), decimals))
}

fn quantity_to_decimal(raw: &str) -> Result<BigDecimal, ChainError> {
    let value = u128::from_str_radix(strip_hex(raw), 16)
        .map_err(|_| ChainError::InvalidResponse(format!("bad quantity: {}", raw)))?;
    Ok(BigDecimal::new(BigInt::from(value), 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::str::FromStr;

    const TO: &str = "0x52908400098527886E0F7030069857D2E4169EE7";
    const HASH: &str = "0xabc123abc123abc123abc123abc123abc123abc123abc123abc123abc123abcd";

    fn tx_body(to: &str, value: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "hash": HASH,
                "from": "0x8617E340B3D01FA5F11F306F4090FD50E238070D",
                "to": to,
                "value": value,
                "blockNumber": "0x10"
            }
        })
        .to_string()
    }

    fn receipt_body(status: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "status": status,
                "gasUsed": "0x5208",
                "effectiveGasPrice": "0x3b9aca00",
                "blockNumber": "0x10"
            }
        })
        .to_string()
    }

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_quantity("0x10").unwrap(), 16);
        assert_eq!(parse_quantity("ff").unwrap(), 255);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn converts_wei_to_whole_units() {
        // 1 ETH in wei.
        let one_eth = hex_value_to_decimal("0xde0b6b3a7640000", 18).unwrap();
        assert_eq!(one_eth, BigDecimal::from_str("1").unwrap());

        let half = hex_value_to_decimal("0x6f05b59d3b20000", 18).unwrap();
        assert_eq!(half, BigDecimal::from_str("0.5").unwrap());
    }

    #[tokio::test]
    async fn fetches_block_number() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"eth_blockNumber"}"#.to_string(),
            ))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1b4"}"#)
            .create_async()
            .await;

        let client = ChainClient::new(server.url(), 18);
        assert_eq!(client.block_number().await.unwrap(), 436);
    }

    #[tokio::test]
    async fn verifies_matching_payment() {
        let mut server = mockito::Server::new_async().await;
        let _tx = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"eth_getTransactionByHash"}"#.to_string(),
            ))
            .with_body(tx_body(TO, "0xde0b6b3a7640000"))
            .create_async()
            .await;
        let _receipt = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"eth_getTransactionReceipt"}"#.to_string(),
            ))
            .with_body(receipt_body("0x1"))
            .create_async()
            .await;

        let client = ChainClient::new(server.url(), 18);
        let expected = BigDecimal::from_str("1").unwrap();
        let verified = client.verify_payment(HASH, TO, &expected).await.unwrap();

        assert_eq!(verified.block_number, 16);
        assert_eq!(verified.paid_amount, expected);
        assert_eq!(verified.gas_used, Some(BigDecimal::from(21000u32)));
    }

    #[tokio::test]
    async fn rejects_wrong_recipient() {
        let mut server = mockito::Server::new_async().await;
        let _tx = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"eth_getTransactionByHash"}"#.to_string(),
            ))
            .with_body(tx_body(
                "0x0000000000000000000000000000000000000001",
                "0xde0b6b3a7640000",
            ))
            .create_async()
            .await;

        let client = ChainClient::new(server.url(), 18);
        let expected = BigDecimal::from_str("1").unwrap();
        let result = client.verify_payment(HASH, TO, &expected).await;

        assert!(matches!(result, Err(ChainError::Verification(_))));
    }

    #[tokio::test]
    async fn rejects_underpayment() {
        let mut server = mockito::Server::new_async().await;
        let _tx = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"eth_getTransactionByHash"}"#.to_string(),
            ))
            .with_body(tx_body(TO, "0x6f05b59d3b20000"))
            .create_async()
            .await;

        let client = ChainClient::new(server.url(), 18);
        let expected = BigDecimal::from_str("1").unwrap();
        let result = client.verify_payment(HASH, TO, &expected).await;

        assert!(matches!(result, Err(ChainError::Verification(_))));
    }

    #[tokio::test]
    async fn rejects_failed_receipt_status() {
        let mut server = mockito::Server::new_async().await;
        let _tx = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"eth_getTransactionByHash"}"#.to_string(),
            ))
            .with_body(tx_body(TO, "0xde0b6b3a7640000"))
            .create_async()
            .await;
        let _receipt = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"eth_getTransactionReceipt"}"#.to_string(),
            ))
            .with_body(receipt_body("0x0"))
            .create_async()
            .await;

        let client = ChainClient::new(server.url(), 18);
        let expected = BigDecimal::from_str("1").unwrap();
        let result = client.verify_payment(HASH, TO, &expected).await;

        assert!(matches!(result, Err(ChainError::Verification(_))));
    }

    #[tokio::test]
    async fn unknown_hash_is_a_verification_failure() {
        let mut server = mockito::Server::new_async().await;
        let _tx = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"eth_getTransactionByHash"}"#.to_string(),
            ))
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .create_async()
            .await;

        let client = ChainClient::new(server.url(), 18);
        let expected = BigDecimal::from_str("1").unwrap();
        let result = client.verify_payment(HASH, TO, &expected).await;

        assert!(matches!(result, Err(ChainError::TxNotFound(_))));
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_consecutive_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(500)
            .expect_at_least(3)
            .create_async()
            .await;

        let client = ChainClient::with_circuit_breaker(server.url(), 18, 3, 60);

        for _ in 0..3 {
            let _ = client.block_number().await;
        }

        let result = client.block_number().await;
        assert!(matches!(result, Err(ChainError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn surfaces_rpc_error_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}}"#,
            )
            .create_async()
            .await;

        let client = ChainClient::new(server.url(), 18);
        let result = client.block_number().await;

        assert!(matches!(result, Err(ChainError::Rpc { code: -32000, .. })));
    }
}
