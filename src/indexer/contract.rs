//! Indexer for resources priced by an on-chain contract read.

use crate::client::{BlockHeader, ClientError, ResourceClient};
use crate::db::PriceStore;
use crate::domain::{Address, BlockNumber, Decimal, Resource, Timestamp};
use crate::indexer::{
    BlockPriceIndexer, IndexerCore, IndexerError, PriceObserver, RetryPolicy,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Prices each block by calling a read method on the resource's contract,
/// passing the block number so the read is anchored to that block's state.
pub struct ContractReadIndexer {
    core: IndexerCore,
    address: Address,
    method: String,
}

impl ContractReadIndexer {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        store: Arc<PriceStore>,
        limits: Arc<Semaphore>,
        retry: RetryPolicy,
        poll_interval: Duration,
        address: Address,
        method: impl Into<String>,
    ) -> Self {
        Self {
            core: IndexerCore::new(client, store, limits, retry, poll_interval),
            address,
            method: method.into(),
        }
    }
}

#[async_trait]
impl PriceObserver for ContractReadIndexer {
    async fn observe_price(
        &self,
        _resource: &Resource,
        header: &BlockHeader,
    ) -> Result<Option<Decimal>, ClientError> {
        let args = [header.number.as_i64().to_string()];
        let price = self
            .core
            .client()
            .read_contract(self.address.as_str(), &self.method, &args)
            .await?;
        Ok(Some(price))
    }
}

#[async_trait]
impl BlockPriceIndexer for ContractReadIndexer {
    async fn index_from_timestamp(
        &self,
        resource: &Resource,
        timestamp: Timestamp,
    ) -> Result<bool, IndexerError> {
        self.core.index_from_timestamp(resource, self, timestamp).await
    }

    async fn index_blocks(
        &self,
        resource: &Resource,
        blocks: &[BlockNumber],
    ) -> Result<bool, IndexerError> {
        self.core.index_blocks(resource, self, blocks).await
    }

    async fn watch_blocks(
        &self,
        resource: &Resource,
        cancel: CancellationToken,
    ) -> Result<(), IndexerError> {
        self.core.watch_blocks(resource, self, cancel).await
    }
}
