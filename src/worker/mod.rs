//! Worker entry points driving the indexing pipeline.

use crate::db::PriceStore;
use crate::domain::{BlockNumber, Timestamp};
use crate::error::AppError;
use crate::indexer::{first_block_at_or_after, IndexerError, RetryPolicy};
use crate::registry::{RegistryEntry, ResourceRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod watch;

/// Drives re-indexing, gap backfill and watch supervision over the registry.
///
/// Callable from the CLI or an external scheduler; carries no scheduling
/// logic of its own.
pub struct ReindexWorker {
    registry: Arc<ResourceRegistry>,
    price_store: Arc<PriceStore>,
    retry: RetryPolicy,
    restart_delay: Duration,
}

impl ReindexWorker {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        price_store: Arc<PriceStore>,
        retry: RetryPolicy,
        restart_delay: Duration,
    ) -> Self {
        Self {
            registry,
            price_store,
            retry,
            restart_delay,
        }
    }

    /// Re-index one resource from `start_timestamp` to the current head.
    ///
    /// Fire-and-forget semantics: success carries no value, an unknown slug
    /// fails immediately, and a batch with failed blocks is only warned about
    /// since its successful writes are already durable.
    pub async fn reindex(
        &self,
        slug: &str,
        start_timestamp: Timestamp,
    ) -> Result<(), AppError> {
        let entry = self.lookup(slug)?;
        info!(
            resource_slug = slug,
            start_timestamp = start_timestamp.as_i64(),
            "reindex requested"
        );

        let complete = entry
            .indexer
            .index_from_timestamp(&entry.resource, start_timestamp)
            .await?;
        if !complete {
            warn!(
                resource_slug = slug,
                "reindex finished with blocks left unindexed"
            );
        }
        Ok(())
    }

    /// Index any blocks missing from stored coverage of `[from_ts, to_ts]`.
    ///
    /// Resolves the window to a block range against the chain, diffs it with
    /// the store, and hands the holes to `index_blocks`. Returns how many
    /// blocks were submitted for backfill.
    pub async fn backfill_missing(
        &self,
        slug: &str,
        from_ts: Timestamp,
        to_ts: Timestamp,
    ) -> Result<usize, AppError> {
        let entry = self.lookup(slug)?;
        let client = entry.client.as_ref();

        let (start, head) = first_block_at_or_after(client, &self.retry, from_ts)
            .await
            .map_err(IndexerError::Client)?;
        let Some(start) = start else {
            info!(resource_slug = slug, "window starts past the chain head, nothing to backfill");
            return Ok(0);
        };

        let (past_end, _) = first_block_at_or_after(
            client,
            &self.retry,
            Timestamp::new(to_ts.as_i64() + 1),
        )
        .await
        .map_err(IndexerError::Client)?;
        let end = match past_end {
            Some(block) => BlockNumber::new(block.as_i64() - 1),
            None => head,
        };
        if end < start {
            return Ok(0);
        }

        let stored: HashSet<i64> = self
            .price_store
            .block_numbers_between(slug, start, end)
            .await?
            .into_iter()
            .map(|b| b.as_i64())
            .collect();
        let missing: Vec<BlockNumber> = (start.as_i64()..=end.as_i64())
            .filter(|n| !stored.contains(n))
            .map(BlockNumber::new)
            .collect();

        if missing.is_empty() {
            info!(
                resource_slug = slug,
                start = start.as_i64(),
                end = end.as_i64(),
                "stored coverage has no gaps"
            );
            return Ok(0);
        }

        info!(
            resource_slug = slug,
            gaps = missing.len(),
            start = start.as_i64(),
            end = end.as_i64(),
            "backfilling missing blocks"
        );
        let complete = entry
            .indexer
            .index_blocks(&entry.resource, &missing)
            .await?;
        if !complete {
            warn!(resource_slug = slug, "backfill finished with blocks left unindexed");
        }
        Ok(missing.len())
    }

    /// Watch every registered resource until the token is cancelled, each in
    /// its own task, restarting failed watch loops after a fixed delay.
    pub async fn watch_all(&self, cancel: CancellationToken) {
        watch::run_all(self.registry.clone(), self.restart_delay, cancel).await;
    }

    fn lookup(&self, slug: &str) -> Result<&RegistryEntry, AppError> {
        self.registry
            .lookup(slug)
            .ok_or_else(|| AppError::ResourceNotFound(slug.to_string()))
    }
}
