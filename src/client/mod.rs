//! Read-only chain access for resource indexing.
//!
//! A [`ResourceClient`] is supplied per resource by its chain configuration and
//! is the only way the pipeline touches a node: block metadata, the current
//! head, and read-only contract calls.

use crate::domain::{BlockNumber, Decimal, Timestamp};
use async_trait::async_trait;
use std::fmt;

pub mod mock;
pub mod rpc;

pub use mock::MockResourceClient;
pub use rpc::RpcResourceClient;

/// Block metadata needed for price observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: BlockNumber,
    /// Block timestamp in unix seconds.
    pub timestamp: Timestamp,
    /// Base fee per gas; absent on chains/blocks without the fee market.
    pub base_fee: Option<Decimal>,
    /// Total gas used by the block.
    pub gas_used: Option<Decimal>,
}

impl BlockHeader {
    pub fn new(number: BlockNumber, timestamp: Timestamp) -> Self {
        Self {
            number,
            timestamp,
            base_fee: None,
            gas_used: None,
        }
    }

    pub fn with_base_fee(mut self, base_fee: Decimal) -> Self {
        self.base_fee = Some(base_fee);
        self
    }

    pub fn with_gas_used(mut self, gas_used: Decimal) -> Self {
        self.gas_used = Some(gas_used);
        self
    }
}

/// Read-only chain access trait.
///
/// Implementations perform a single attempt per call; retry policy lives with
/// the caller, driven by [`ClientError::is_transient`].
#[async_trait]
pub trait ResourceClient: Send + Sync + fmt::Debug {
    /// Fetch the header of one block.
    async fn read_block(&self, number: BlockNumber) -> Result<BlockHeader, ClientError>;

    /// Fetch the current chain head height.
    async fn current_block_number(&self) -> Result<BlockNumber, ClientError>;

    /// Invoke a read-only contract method and decode the returned quantity.
    async fn read_contract(
        &self,
        address: &str,
        method: &str,
        args: &[String],
    ) -> Result<Decimal, ClientError>;
}

/// Error type for chain client operations.
#[derive(Debug, Clone)]
pub enum ClientError {
    /// Network error (e.g., connection timeout, DNS failure)
    Network(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    Http { status: u16, message: String },
    /// JSON-RPC level error returned by the node
    Rpc { code: i64, message: String },
    /// Parsing error (invalid JSON or malformed response)
    Parse(String),
    /// Response is missing a field the caller requires
    MissingField(String),
}

impl ClientError {
    /// Whether retrying the call may succeed.
    ///
    /// Connection failures, rate limits and server errors are transient;
    /// protocol and decode failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Http { status, .. } => *status == 429 || *status >= 500,
            ClientError::Rpc { .. } => false,
            ClientError::Parse(_) => false,
            ClientError::MissingField(_) => false,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Network(msg) => write!(f, "Network error: {}", msg),
            ClientError::Http { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            ClientError::Rpc { code, message } => write!(f, "RPC error {}: {}", code, message),
            ClientError::Parse(msg) => write!(f, "Parse error: {}", msg),
            ClientError::MissingField(field) => write!(f, "Missing field: {}", field),
        }
    }
}

impl std::error::Error for ClientError {}
