//! Indexer for resources priced by a fixed formula over block fields.

use crate::client::{BlockHeader, ClientError, ResourceClient};
use crate::db::PriceStore;
use crate::domain::{BlockNumber, Decimal, Resource, Timestamp};
use crate::indexer::{
    BlockPriceIndexer, IndexerCore, IndexerError, PriceObserver, RetryPolicy,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Derives the price directly from header fields, no extra round trips.
///
/// The current formula is the block base fee; blocks from before the fee
/// market carry no base fee and produce no sample.
pub struct FixedFormulaIndexer {
    core: IndexerCore,
}

impl FixedFormulaIndexer {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        store: Arc<PriceStore>,
        limits: Arc<Semaphore>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            core: IndexerCore::new(client, store, limits, retry, poll_interval),
        }
    }
}

#[async_trait]
impl PriceObserver for FixedFormulaIndexer {
    async fn observe_price(
        &self,
        _resource: &Resource,
        header: &BlockHeader,
    ) -> Result<Option<Decimal>, ClientError> {
        Ok(header.base_fee)
    }
}

#[async_trait]
impl BlockPriceIndexer for FixedFormulaIndexer {
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
