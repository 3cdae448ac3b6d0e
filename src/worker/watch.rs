//! Resilient watch supervision: one task per resource, restarted on failure.

use crate::domain::Resource;
use crate::indexer::BlockPriceIndexer;
use crate::registry::ResourceRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Spawn a supervised watch per registry entry and wait for all of them.
pub(crate) async fn run_all(
    registry: Arc<ResourceRegistry>,
    restart_delay: Duration,
    cancel: CancellationToken,
) {
    let mut handles = Vec::new();
    for entry in registry.entries() {
        let resource = entry.resource.clone();
        let indexer = entry.indexer.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            supervise(resource, indexer, restart_delay, cancel).await;
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "watch task panicked");
        }
    }
}

/// Run one watch loop until cancellation, restarting after `restart_delay`
/// whenever it fails so a flaky endpoint cannot kill coverage.
async fn supervise(
    resource: Resource,
    indexer: Arc<dyn BlockPriceIndexer>,
    restart_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        match indexer.watch_blocks(&resource, cancel.clone()).await {
            Ok(()) => {
                info!(resource_slug = %resource.slug, "watch stopped");
                return;
            }
            Err(e) => {
                error!(
                    resource_slug = %resource.slug,
                    error = %e,
                    "watch failed, restarting after delay"
                );
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(restart_delay) => {}
        }
    }
}
