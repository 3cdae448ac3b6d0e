//! Indexed resource model.

use crate::domain::Address;
use serde::{Deserialize, Serialize};

/// How a resource's per-block price is observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Price computed directly from block metadata (base fee).
    FixedFormula,
    /// Price read from an on-chain contract method per block.
    #[serde(rename_all = "camelCase")]
    ContractRead {
        /// Contract that exposes the price read.
        address: Address,
        /// Read-only method invoked with the block number.
        method: String,
    },
}

/// A named external metric indexed block by block (gas price, blob price, hashrate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Stable identifier used as the storage key ("ethereum-gas").
    pub slug: String,
    /// Human-readable name.
    pub name: String,
    /// Price observation variant.
    #[serde(flatten)]
    pub kind: ResourceKind,
}

impl Resource {
    pub fn new(slug: impl Into<String>, name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_json_tags() {
        let fixed = Resource::new("ethereum-gas", "Ethereum Gas", ResourceKind::FixedFormula);
        let json = serde_json::to_value(&fixed).unwrap();
        assert_eq!(json["kind"], "fixed-formula");

        let contract = Resource::new(
            "blobspace",
            "Blobspace",
            ResourceKind::ContractRead {
                address: Address::new("0xfeed".to_string()),
                method: "getResourcePrice".to_string(),
            },
        );
        let json = serde_json::to_value(&contract).unwrap();
        assert_eq!(json["kind"], "contract-read");
        assert_eq!(json["address"], "0xfeed");
    }

    #[test]
    fn test_resource_roundtrip() {
        let resource = Resource::new("ethereum-gas", "Ethereum Gas", ResourceKind::FixedFormula);
        let json = serde_json::to_string(&resource).unwrap();
        let back: Resource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resource);
    }
}
