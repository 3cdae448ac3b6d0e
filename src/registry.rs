//! Maps configured resources to their client and indexer instances.

use crate::client::{ResourceClient, RpcResourceClient};
use crate::config::ResourceConfig;
use crate::db::PriceStore;
use crate::domain::{Resource, ResourceKind};
use crate::indexer::{
    BlockPriceIndexer, ContractReadIndexer, FixedFormulaIndexer, RetryPolicy,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

pub struct RegistryEntry {
    pub resource: Resource,
    pub client: Arc<dyn ResourceClient>,
    pub indexer: Arc<dyn BlockPriceIndexer>,
}

/// One indexer instance per resource slug.
///
/// Indexer instances carry the per-resource write lock, so a slug must keep
/// the same instance for the life of the process.
pub struct ResourceRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Build the full registry from the resources file: an RPC client pinned
    /// to each resource's endpoint, and the indexer variant its kind selects.
    pub fn from_configs(
        configs: &[ResourceConfig],
        store: Arc<PriceStore>,
        limits: Arc<Semaphore>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        let mut registry = Self::new();
        for config in configs {
            let client: Arc<dyn ResourceClient> =
                Arc::new(RpcResourceClient::new(config.rpc_url.clone()));
            let indexer = build_indexer(
                &config.resource,
                client.clone(),
                store.clone(),
                limits.clone(),
                retry.clone(),
                poll_interval,
            );
            registry.register(config.resource.clone(), client, indexer);
        }
        registry
    }

    pub fn register(
        &mut self,
        resource: Resource,
        client: Arc<dyn ResourceClient>,
        indexer: Arc<dyn BlockPriceIndexer>,
    ) {
        if self.entries.contains_key(&resource.slug) {
            warn!(resource_slug = %resource.slug, "replacing duplicate resource registration");
        }
        self.entries.insert(
            resource.slug.clone(),
            RegistryEntry {
                resource,
                client,
                indexer,
            },
        );
    }

    pub fn lookup(&self, slug: &str) -> Option<&RegistryEntry> {
        self.entries.get(slug)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Select the indexer variant for a resource's kind.
pub fn build_indexer(
    resource: &Resource,
    client: Arc<dyn ResourceClient>,
    store: Arc<PriceStore>,
    limits: Arc<Semaphore>,
    retry: RetryPolicy,
    poll_interval: Duration,
) -> Arc<dyn BlockPriceIndexer> {
    match &resource.kind {
        ResourceKind::FixedFormula => Arc::new(FixedFormulaIndexer::new(
            client,
            store,
            limits,
            retry,
            poll_interval,
        )),
        ResourceKind::ContractRead { address, method } => Arc::new(ContractReadIndexer::new(
            client,
            store,
            limits,
            retry,
            poll_interval,
            address.clone(),
            method.clone(),
        )),
    }
}
