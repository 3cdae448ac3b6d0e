//! Per-epoch PnL records and the collateral ledger entities they are built from.

use crate::domain::{Address, Decimal, Timestamp};
use serde::{Deserialize, Serialize};

/// Per-epoch, per-owner profit and loss summary.
///
/// Invariant: `total_pnl == total_withdrawals - total_deposits + open_positions_pnl`.
/// Deposits are negative cash flow to the owner; withdrawals are stored positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnLRecord {
    pub epoch_id: i64,
    pub owner: Address,
    pub total_deposits: Decimal,
    pub total_withdrawals: Decimal,
    pub open_positions_pnl: Decimal,
    pub total_pnl: Decimal,
    /// Position identifiers contributing to this record.
    pub positions: Vec<i64>,
    /// Set when at least one open position could not be valued; the summed
    /// fields then omit that position's contribution.
    pub incomplete: bool,
}

impl PnLRecord {
    /// An empty record for an owner with no activity in the epoch.
    pub fn empty(epoch_id: i64, owner: Address) -> Self {
        Self {
            epoch_id,
            owner,
            total_deposits: Decimal::zero(),
            total_withdrawals: Decimal::zero(),
            open_positions_pnl: Decimal::zero(),
            total_pnl: Decimal::zero(),
            positions: Vec::new(),
            incomplete: false,
        }
    }
}

/// A collateral deposit/withdrawal ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollateralTransfer {
    /// Stable unique identifier for this event.
    ///
    /// Priority: `tx_hash` (if present) > hash of deterministic fields.
    pub event_key: String,
    /// Epoch the transfer is scoped to.
    pub epoch_id: i64,
    /// Owner wallet address.
    pub owner: Address,
    /// Time of the event in unix seconds.
    pub timestamp: Timestamp,
    /// Signed amount (positive deposit, negative withdrawal).
    pub collateral: Decimal,
    /// Transaction hash when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl CollateralTransfer {
    /// Create a new CollateralTransfer and compute its `event_key`.
    pub fn new(
        epoch_id: i64,
        owner: Address,
        timestamp: Timestamp,
        collateral: Decimal,
        tx_hash: Option<String>,
    ) -> Self {
        let tx_hash = normalize_tx_hash(tx_hash);
        let event_key =
            Self::compute_event_key(epoch_id, &owner, timestamp, &collateral, tx_hash.as_deref());
        Self {
            event_key,
            epoch_id,
            owner,
            timestamp,
            collateral,
            tx_hash,
        }
    }

    /// Compute a stable unique key for this event.
    ///
    /// Priority: `tx_hash` (if present) > hash of deterministic fields
    /// (epoch, owner, timestamp, collateral).
    ///
    /// # Hash Collision Resistance
    ///
    /// When `tx_hash` is unavailable, we generate a key by truncating a SHA-256 hash
    /// to 128 bits (16 bytes). This provides approximately 2^64 collision resistance
    /// via the birthday bound, which is sufficient for our expected dataset sizes
    /// (far fewer than 2^32 transfers per owner).
    pub fn compute_event_key(
        epoch_id: i64,
        owner: &Address,
        timestamp: Timestamp,
        collateral: &Decimal,
        tx_hash: Option<&str>,
    ) -> String {
        if let Some(tx) = tx_hash.filter(|s| !s.trim().is_empty()) {
            return tx.trim().to_lowercase();
        }

        use sha2::{Digest, Sha256};

        fn hash_var(hasher: &mut Sha256, data: &str) {
            hasher.update((data.len() as u32).to_le_bytes());
            hasher.update(data.as_bytes());
        }

        let mut hasher = Sha256::new();
        hasher.update(epoch_id.to_le_bytes());
        hash_var(&mut hasher, owner.as_str());
        hasher.update(timestamp.as_i64().to_le_bytes());
        hash_var(&mut hasher, &collateral.to_canonical_string());

        let hash = hasher.finalize();
        format!("hash:{}", hex::encode(&hash[..16]))
    }

    /// True for deposits (positive collateral flow into the epoch).
    pub fn is_deposit(&self) -> bool {
        self.collateral.is_positive()
    }
}

fn normalize_tx_hash(tx_hash: Option<String>) -> Option<String> {
    tx_hash
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
}

/// A market position scoped to an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// On-chain position identifier, unique together with `epoch_id`.
    pub position_id: i64,
    pub epoch_id: i64,
    pub owner: Address,
    /// Cost basis: collateral locked when the position was opened.
    pub collateral: Decimal,
    /// Settled positions are closed and excluded from open PnL.
    pub is_settled: bool,
    /// Market contract the position is valued against.
    pub market_address: Address,
}

impl Position {
    pub fn is_open(&self) -> bool {
        !self.is_settled
    }
}
