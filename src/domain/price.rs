//! Raw per-block price observation.

use crate::domain::{BlockNumber, Decimal, Timestamp};
use serde::{Deserialize, Serialize};

/// One price observation for one resource at one block.
///
/// Unique per (resource_slug, block_number); for a given resource the
/// timestamp never decreases as the block number increases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSample {
    /// Resource this observation belongs to.
    pub resource_slug: String,
    /// Block the price was observed at.
    pub block_number: BlockNumber,
    /// Block timestamp in unix seconds.
    pub timestamp: Timestamp,
    /// Observed price (arbitrary-precision integer in the chain's smallest unit).
    pub price: Decimal,
}

impl PriceSample {
    pub fn new(
        resource_slug: impl Into<String>,
        block_number: BlockNumber,
        timestamp: Timestamp,
        price: Decimal,
    ) -> Self {
        Self {
            resource_slug: resource_slug.into(),
            block_number,
            timestamp,
            price,
        }
    }
}
