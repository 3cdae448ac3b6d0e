//! Block price ingestion.
//!
//! [`BlockPriceIndexer`] is the polymorphic ingestion engine: one
//! implementation per resource kind, selected by the registry. Variants differ
//! only in how a price is observed for a fetched block; range resolution,
//! bounded concurrent fetching, retries and reorg-aware writes are shared.

use crate::client::{BlockHeader, ClientError, ResourceClient};
use crate::db::{PriceStore, UpsertOutcome};
use crate::domain::{BlockNumber, Decimal, PriceSample, Resource, Timestamp};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod contract;
pub mod fixed;

pub use contract::ContractReadIndexer;
pub use fixed::FixedFormulaIndexer;

/// How many block fetches one indexing call keeps in flight; the shared
/// semaphore still caps the total across resources.
const FETCH_PIPELINE: usize = 8;

/// Error fatal to an indexing operation.
///
/// Per-block fetch failures inside a batch are not errors; they are logged and
/// reported through the `Ok(false)` path so partial progress survives.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("no block found at or after timestamp {timestamp} for resource {slug}")]
    NoBlockAtTimestamp { slug: String, timestamp: i64 },
}

/// Polymorphic per-block price ingestion.
#[async_trait]
pub trait BlockPriceIndexer: Send + Sync {
    /// Index every block from the first one at or after `timestamp` up to the
    /// current head. Idempotent; a differing stored price (reorg) is
    /// overwritten and logged.
    ///
    /// Returns `Ok(false)` when one or more blocks failed after retry
    /// exhaustion; samples written before the failure are kept.
    async fn index_from_timestamp(
        &self,
        resource: &Resource,
        timestamp: Timestamp,
    ) -> Result<bool, IndexerError>;

    /// Same write contract for an explicit, possibly non-contiguous set of
    /// blocks (gap backfill).
    async fn index_blocks(
        &self,
        resource: &Resource,
        blocks: &[BlockNumber],
    ) -> Result<bool, IndexerError>;

    /// Long-running poll loop indexing each new block as it is produced.
    ///
    /// Returns `Ok(())` only on cancellation; retry exhaustion surfaces as an
    /// error so a supervisor can restart the watch.
    async fn watch_blocks(
        &self,
        resource: &Resource,
        cancel: CancellationToken,
    ) -> Result<(), IndexerError>;
}

/// How one variant turns a fetched block into a price, if the block carries
/// one at all.
#[async_trait]
pub(crate) trait PriceObserver: Send + Sync {
    async fn observe_price(
        &self,
        resource: &Resource,
        header: &BlockHeader,
    ) -> Result<Option<Decimal>, ClientError>;
}

/// Exponential backoff bounds for transient client failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    /// Total time budget across attempts; exhaustion surfaces the last error.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_elapsed: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }
}

/// Run one client call under the policy, retrying transient failures.
pub(crate) async fn with_retry<T, Fut, F>(policy: &RetryPolicy, mut op: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ClientError>>,
{
    retry(policy.to_backoff(), || {
        let attempt = op();
        async move {
            attempt.await.map_err(|e| {
                if e.is_transient() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        }
    })
    .await
}

/// Binary-search the first block whose timestamp is at or after `timestamp`.
///
/// Block timestamps are non-decreasing in block number, so the predicate is
/// monotone. Returns the matching block (`None` when even the head is older
/// than the target) together with the head observed during the search.
pub async fn first_block_at_or_after(
    client: &dyn ResourceClient,
    policy: &RetryPolicy,
    timestamp: Timestamp,
) -> Result<(Option<BlockNumber>, BlockNumber), ClientError> {
    let head = with_retry(policy, || client.current_block_number()).await?;
    let head_header = with_retry(policy, || client.read_block(head)).await?;
    if head_header.timestamp < timestamp {
        return Ok((None, head));
    }

    let mut low = 0i64;
    let mut high = head.as_i64();
    let mut closest: Option<BlockNumber> = None;
    while low <= high {
        let mid = low + (high - low) / 2;
        let header = with_retry(policy, || client.read_block(BlockNumber::new(mid))).await?;
        if header.timestamp < timestamp {
            low = mid + 1;
        } else {
            closest = Some(header.number);
            high = mid - 1;
        }
    }

    Ok((closest, head))
}

/// Shared ingestion plumbing used by every indexer variant.
///
/// Owns the per-resource write lock: an indexer instance is 1:1 with a
/// resource via the registry, so holding the lock for the duration of an
/// index operation serializes writes per resource.
pub(crate) struct IndexerCore {
    client: Arc<dyn ResourceClient>,
    store: Arc<PriceStore>,
    limits: Arc<Semaphore>,
    retry: RetryPolicy,
    poll_interval: Duration,
    write_lock: Mutex<()>,
}

impl IndexerCore {
    pub(crate) fn new(
        client: Arc<dyn ResourceClient>,
        store: Arc<PriceStore>,
        limits: Arc<Semaphore>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            store,
            limits,
            retry,
            poll_interval,
            write_lock: Mutex::new(()),
        }
    }

    pub(crate) fn client(&self) -> &dyn ResourceClient {
        self.client.as_ref()
    }

    pub(crate) async fn index_from_timestamp(
        &self,
        resource: &Resource,
        observer: &dyn PriceObserver,
        timestamp: Timestamp,
    ) -> Result<bool, IndexerError> {
        let _guard = self.write_lock.lock().await;

        let (start, head) = self.resolve_start_block(resource, timestamp).await?;
        info!(
            resource_slug = %resource.slug,
            start_block = start.as_i64(),
            head = head.as_i64(),
            "indexing block range from timestamp {}",
            timestamp
        );

        self.index_numbers(
            resource,
            observer,
            (start.as_i64()..=head.as_i64()).map(BlockNumber::new),
        )
        .await
    }

    pub(crate) async fn index_blocks(
        &self,
        resource: &Resource,
        observer: &dyn PriceObserver,
        blocks: &[BlockNumber],
    ) -> Result<bool, IndexerError> {
        let _guard = self.write_lock.lock().await;
        self.index_numbers(resource, observer, blocks.iter().copied())
            .await
    }

    pub(crate) async fn watch_blocks(
        &self,
        resource: &Resource,
        observer: &dyn PriceObserver,
        cancel: CancellationToken,
    ) -> Result<(), IndexerError> {
        info!(resource_slug = %resource.slug, "starting block watch");
        let mut last_indexed = self.store.max_block_number(&resource.slug).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(resource_slug = %resource.slug, "block watch cancelled");
                    return Ok(());
                }
                result = self.watch_tick(resource, observer, &mut last_indexed) => {
                    result?;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(resource_slug = %resource.slug, "block watch cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// One poll: index everything between the last indexed block and the
    /// current head. Unlike batch indexing, any exhaustion here is fatal.
    async fn watch_tick(
        &self,
        resource: &Resource,
        observer: &dyn PriceObserver,
        last_indexed: &mut Option<BlockNumber>,
    ) -> Result<(), IndexerError> {
        let head = with_retry(&self.retry, || self.client.current_block_number()).await?;

        let from = match *last_indexed {
            Some(last) if last < head => last.next(),
            // Nothing stored yet: start at the head, only new blocks matter.
            None => head,
            Some(_) => return Ok(()),
        };

        let _guard = self.write_lock.lock().await;
        for number in from.as_i64()..=head.as_i64() {
            let number = BlockNumber::new(number);
            let header = self.fetch_block(number).await?;
            match with_retry(&self.retry, || observer.observe_price(resource, &header)).await? {
                Some(price) => {
                    self.write_sample(resource, &header, price).await?;
                }
                None => {
                    debug!(
                        resource_slug = %resource.slug,
                        block = number.as_i64(),
                        "block carries no price observation, skipping"
                    );
                }
            }
            *last_indexed = Some(number);
        }

        Ok(())
    }

    /// Resolve the start of an indexing range, failing when the whole chain
    /// predates the requested timestamp.
    async fn resolve_start_block(
        &self,
        resource: &Resource,
        timestamp: Timestamp,
    ) -> Result<(BlockNumber, BlockNumber), IndexerError> {
        let (start, head) =
            first_block_at_or_after(self.client.as_ref(), &self.retry, timestamp).await?;
        let start = start.ok_or_else(|| IndexerError::NoBlockAtTimestamp {
            slug: resource.slug.clone(),
            timestamp: timestamp.as_i64(),
        })?;
        Ok((start, head))
    }

    /// Fetch, observe and upsert an explicit sequence of blocks.
    ///
    /// Fetches are pipelined in input order under the shared concurrency
    /// limit; writes stay sequential so the per-resource upsert invariant
    /// holds. A block that fails after retries is logged and skipped.
    async fn index_numbers<I>(
        &self,
        resource: &Resource,
        observer: &dyn PriceObserver,
        numbers: I,
    ) -> Result<bool, IndexerError>
    where
        I: IntoIterator<Item = BlockNumber>,
    {
        let mut written = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;

        let mut observations = stream::iter(numbers.into_iter().map(|number| async move {
            let observation = self.observe_block(resource, observer, number).await;
            (number, observation)
        }))
        .buffered(FETCH_PIPELINE);

        while let Some((number, observation)) = observations.next().await {
            match observation {
                Ok(Some((header, price))) => {
                    self.write_sample(resource, &header, price).await?;
                    written += 1;
                }
                Ok(None) => {
                    debug!(
                        resource_slug = %resource.slug,
                        block = number.as_i64(),
                        "block carries no price observation, skipping"
                    );
                    skipped += 1;
                }
                Err(e) => {
                    error!(
                        resource_slug = %resource.slug,
                        block = number.as_i64(),
                        error = %e,
                        "failed to index block after retries"
                    );
                    failed += 1;
                }
            }
        }

        info!(
            resource_slug = %resource.slug,
            written,
            skipped,
            failed,
            "finished indexing block set"
        );
        Ok(failed == 0)
    }

    /// Fetch one block and observe its price under the shared limit.
    async fn observe_block(
        &self,
        resource: &Resource,
        observer: &dyn PriceObserver,
        number: BlockNumber,
    ) -> Result<Option<(BlockHeader, Decimal)>, ClientError> {
        let _permit = self
            .limits
            .acquire()
            .await
            .map_err(|e| ClientError::Network(format!("concurrency limiter closed: {}", e)))?;

        let header = self.fetch_block(number).await?;
        let price = with_retry(&self.retry, || observer.observe_price(resource, &header)).await?;
        Ok(price.map(|price| (header, price)))
    }

    async fn fetch_block(&self, number: BlockNumber) -> Result<BlockHeader, ClientError> {
        with_retry(&self.retry, || self.client.read_block(number)).await
    }

    async fn write_sample(
        &self,
        resource: &Resource,
        header: &BlockHeader,
        price: Decimal,
    ) -> Result<(), sqlx::Error> {
        let sample = PriceSample::new(&resource.slug, header.number, header.timestamp, price);
        match self.store.upsert(&sample).await? {
            UpsertOutcome::Inserted => {
                debug!(
                    resource_slug = %resource.slug,
                    block = header.number.as_i64(),
                    price = %price,
                    "stored block price"
                );
            }
            UpsertOutcome::Unchanged => {}
            UpsertOutcome::Replaced { previous } => {
                warn!(
                    resource_slug = %resource.slug,
                    block = header.number.as_i64(),
                    previous = %previous,
                    price = %price,
                    "overwrote reorged block price"
                );
            }
        }
        Ok(())
    }
}
