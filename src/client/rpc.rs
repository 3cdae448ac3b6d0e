//! JSON-RPC chain client implementation.

use super::{BlockHeader, ClientError, ResourceClient};
use crate::domain::{BlockNumber, Decimal, Timestamp};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Chain client speaking JSON-RPC 2.0 to a node endpoint.
///
/// Performs one attempt per call and maps failures into the
/// transient/permanent taxonomy of [`ClientError`]; backoff is the caller's
/// concern. Read-only contract calls go through the gateway's `contract_call`
/// method, which takes the target address, method name and string arguments.
#[derive(Debug)]
pub struct RpcResourceClient {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl RpcResourceClient {
    /// Create a new client for one node endpoint.
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            next_id: AtomicU64::new(1),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        debug!("rpc request endpoint={} method={}", self.endpoint, method);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("HTTP error")
                    .to_string(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;

        if let Some(err) = body.get("error") {
            return Err(ClientError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        body.get("result")
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| ClientError::MissingField("result".to_string()))
    }
}

#[async_trait]
impl ResourceClient for RpcResourceClient {
    async fn read_block(&self, number: BlockNumber) -> Result<BlockHeader, ClientError> {
        let result = self
            .request(
                "eth_getBlockByNumber",
                json!([quantity_hex(number.as_i64()), false]),
            )
            .await?;
        parse_block_header(&result)
    }

    async fn current_block_number(&self) -> Result<BlockNumber, ClientError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| ClientError::Parse("block number is not a string".to_string()))?;
        Ok(BlockNumber::new(hex_to_i64(hex)?))
    }

    async fn read_contract(
        &self,
        address: &str,
        method: &str,
        args: &[String],
    ) -> Result<Decimal, ClientError> {
        let result = self
            .request(
                "contract_call",
                json!([{ "to": address, "method": method, "args": args }]),
            )
            .await?;
        decode_quantity(&result)
    }
}

/// Format a block height as a 0x-prefixed hex quantity.
fn quantity_hex(value: i64) -> String {
    format!("0x{:x}", value)
}

fn hex_to_i64(hex: &str) -> Result<i64, ClientError> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    i64::from_str_radix(digits, 16)
        .map_err(|e| ClientError::Parse(format!("invalid hex quantity {}: {}", hex, e)))
}

fn hex_to_decimal(hex: &str) -> Result<Decimal, ClientError> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    let value = u128::from_str_radix(digits, 16)
        .map_err(|e| ClientError::Parse(format!("invalid hex quantity {}: {}", hex, e)))?;
    Decimal::from_str_canonical(&value.to_string())
        .map_err(|e| ClientError::Parse(format!("quantity out of range {}: {}", hex, e)))
}

/// Decode a numeric RPC result: 0x-hex quantity, decimal string or JSON number.
fn decode_quantity(value: &Value) -> Result<Decimal, ClientError> {
    match value {
        Value::String(s) if s.starts_with("0x") => hex_to_decimal(s),
        Value::String(s) => Decimal::from_str_canonical(s)
            .map_err(|e| ClientError::Parse(format!("invalid quantity {}: {}", s, e))),
        Value::Number(n) => Decimal::from_str_canonical(&n.to_string())
            .map_err(|e| ClientError::Parse(format!("invalid quantity {}: {}", n, e))),
        other => Err(ClientError::Parse(format!(
            "quantity is neither string nor number: {}",
            other
        ))),
    }
}

fn parse_block_header(block: &Value) -> Result<BlockHeader, ClientError> {
    let number = block
        .get("number")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::MissingField("number".to_string()))?;
    let timestamp = block
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::MissingField("timestamp".to_string()))?;

    let mut header = BlockHeader::new(
        BlockNumber::new(hex_to_i64(number)?),
        Timestamp::new(hex_to_i64(timestamp)?),
    );

    if let Some(base_fee) = block.get("baseFeePerGas").filter(|v| !v.is_null()) {
        header.base_fee = Some(decode_quantity(base_fee)?);
    }
    if let Some(gas_used) = block.get("gasUsed").filter(|v| !v.is_null()) {
        header.gas_used = Some(decode_quantity(gas_used)?);
    }

    Ok(header)
}
