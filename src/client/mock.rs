//! Mock chain client for testing without network calls.

use super::{BlockHeader, ClientError, ResourceClient};
use crate::domain::{BlockNumber, Decimal};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mock chain client returning scripted blocks and contract values.
///
/// Blocks can be appended while the mock is shared (watch-loop tests) and
/// failures can be injected per call site to exercise retry paths. Unscripted
/// contract reads fail with an RPC revert.
#[derive(Debug, Default)]
pub struct MockResourceClient {
    blocks: Mutex<BTreeMap<i64, BlockHeader>>,
    contract_values: Mutex<HashMap<String, Decimal>>,
    block_failures: Mutex<HashMap<i64, u32>>,
    head_failures: Mutex<u32>,
    contract_failures: Mutex<HashMap<String, u32>>,
    read_block_calls: AtomicU64,
    head_calls: AtomicU64,
    contract_calls: AtomicU64,
}

impl MockResourceClient {
    /// Create a new mock with no blocks scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script one block.
    pub fn with_block(self, header: BlockHeader) -> Self {
        self.push_block(header);
        self
    }

    /// Script multiple blocks.
    pub fn with_blocks(self, headers: Vec<BlockHeader>) -> Self {
        for header in headers {
            self.push_block(header);
        }
        self
    }

    /// Script the value returned for one contract read.
    pub fn with_contract_value(
        self,
        address: &str,
        method: &str,
        args: &[String],
        value: Decimal,
    ) -> Self {
        lock(&self.contract_values).insert(contract_key(address, method, args), value);
        self
    }

    /// Append a block after construction; the head advances with it.
    pub fn push_block(&self, header: BlockHeader) {
        lock(&self.blocks).insert(header.number.as_i64(), header);
    }

    /// Make the next `times` reads of `number` fail with a transient error.
    pub fn fail_block_reads(&self, number: BlockNumber, times: u32) {
        lock(&self.block_failures).insert(number.as_i64(), times);
    }

    /// Make the next `times` head queries fail with a transient error.
    pub fn fail_head_reads(&self, times: u32) {
        *lock(&self.head_failures) = times;
    }

    /// Make the next `times` reads of one contract key fail transiently.
    pub fn fail_contract_reads(&self, address: &str, method: &str, args: &[String], times: u32) {
        lock(&self.contract_failures).insert(contract_key(address, method, args), times);
    }

    /// Number of `read_block` calls made so far.
    pub fn read_block_calls(&self) -> u64 {
        self.read_block_calls.load(Ordering::Relaxed)
    }

    /// Number of `read_contract` calls made so far.
    pub fn contract_calls(&self) -> u64 {
        self.contract_calls.load(Ordering::Relaxed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn contract_key(address: &str, method: &str, args: &[String]) -> String {
    format!("{}:{}:{}", address, method, args.join(","))
}

fn take_failure(failures: &mut u32) -> bool {
    if *failures > 0 {
        *failures -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl ResourceClient for MockResourceClient {
    async fn read_block(&self, number: BlockNumber) -> Result<BlockHeader, ClientError> {
        self.read_block_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(failures) = lock(&self.block_failures).get_mut(&number.as_i64()) {
            if take_failure(failures) {
                return Err(ClientError::Network(format!(
                    "injected failure reading block {}",
                    number
                )));
            }
        }

        lock(&self.blocks)
            .get(&number.as_i64())
            .cloned()
            .ok_or_else(|| ClientError::MissingField(format!("block {}", number)))
    }

    async fn current_block_number(&self) -> Result<BlockNumber, ClientError> {
        self.head_calls.fetch_add(1, Ordering::Relaxed);

        if take_failure(&mut lock(&self.head_failures)) {
            return Err(ClientError::Network(
                "injected failure reading head".to_string(),
            ));
        }

        lock(&self.blocks)
            .keys()
            .next_back()
            .map(|n| BlockNumber::new(*n))
            .ok_or_else(|| ClientError::MissingField("head".to_string()))
    }

    async fn read_contract(
        &self,
        address: &str,
        method: &str,
        args: &[String],
    ) -> Result<Decimal, ClientError> {
        self.contract_calls.fetch_add(1, Ordering::Relaxed);
        let key = contract_key(address, method, args);

        if let Some(failures) = lock(&self.contract_failures).get_mut(&key) {
            if take_failure(failures) {
                return Err(ClientError::Network(format!(
                    "injected failure calling {}",
                    key
                )));
            }
        }

        lock(&self.contract_values)
            .get(&key)
            .copied()
            .ok_or_else(|| ClientError::Rpc {
                code: -32000,
                message: "execution reverted".to_string(),
            })
    }
}
