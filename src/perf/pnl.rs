//! Per-epoch profit and loss over the collateral ledger.

use crate::client::{ClientError, ResourceClient};
use crate::db::LedgerStore;
use crate::domain::{Address, Decimal, PnLRecord, Position};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Contract read method returning a position's current collateral value.
const POSITION_VALUE_METHOD: &str = "getPositionCollateralValue";

#[derive(Debug, Error)]
pub enum PnlError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Computes realized and open PnL per owner for one epoch.
///
/// Deposits and withdrawals come from the stored transfer ledger; open
/// positions are valued live through the market contract. A failed valuation
/// marks the record incomplete instead of failing the whole computation, and
/// never substitutes a zero.
pub struct PnLCalculator {
    ledger: Arc<LedgerStore>,
    client: Arc<dyn ResourceClient>,
}

impl PnLCalculator {
    pub fn new(ledger: Arc<LedgerStore>, client: Arc<dyn ResourceClient>) -> Self {
        Self { ledger, client }
    }

    /// PnL records for every owner active in the epoch, ordered by owner.
    pub async fn calculate_epoch(&self, epoch_id: i64) -> Result<Vec<PnLRecord>, PnlError> {
        let owners = self.ledger.owners_in_epoch(epoch_id).await?;
        let mut records = Vec::with_capacity(owners.len());
        for owner in &owners {
            records.push(self.calculate(epoch_id, owner).await?);
        }
        Ok(records)
    }

    /// PnL for one owner. An owner with no activity in the epoch yields a
    /// zeroed record rather than an error.
    pub async fn calculate(
        &self,
        epoch_id: i64,
        owner: &Address,
    ) -> Result<PnLRecord, PnlError> {
        let transfers = self.ledger.transfers_for_owner(epoch_id, owner).await?;

        let mut total_deposits = Decimal::zero();
        let mut total_withdrawals = Decimal::zero();
        for transfer in &transfers {
            if transfer.is_deposit() {
                total_deposits = total_deposits + transfer.collateral;
            } else {
                // Withdrawals are stored signed; the record carries magnitudes.
                total_withdrawals = total_withdrawals + transfer.collateral.abs();
            }
        }

        let positions = self.ledger.positions_for_owner(epoch_id, owner).await?;
        let mut open_positions_pnl = Decimal::zero();
        let mut position_ids = Vec::with_capacity(positions.len());
        let mut incomplete = false;
        for position in &positions {
            position_ids.push(position.position_id);
            if !position.is_open() {
                continue;
            }
            match self.position_value(position).await {
                Ok(value) => {
                    open_positions_pnl = open_positions_pnl + (value - position.collateral);
                }
                Err(e) => {
                    warn!(
                        epoch_id,
                        owner = %owner,
                        position_id = position.position_id,
                        error = %e,
                        "failed to value open position, marking record incomplete"
                    );
                    incomplete = true;
                }
            }
        }

        let total_pnl = total_withdrawals - total_deposits + open_positions_pnl;
        Ok(PnLRecord {
            epoch_id,
            owner: owner.clone(),
            total_deposits,
            total_withdrawals,
            open_positions_pnl,
            total_pnl,
            positions: position_ids,
            incomplete,
        })
    }

    async fn position_value(&self, position: &Position) -> Result<Decimal, ClientError> {
        let args = [position.position_id.to_string()];
        self.client
            .read_contract(
                position.market_address.as_str(),
                POSITION_VALUE_METHOD,
                &args,
            )
            .await
    }
}
