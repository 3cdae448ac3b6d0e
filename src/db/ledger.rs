//! Collateral transfer and position persistence (the ledger PnL reads from).
//!
//! Rows are written by the market event indexer upstream; this crate owns the
//! schema and the read side.

use crate::domain::{Address, CollateralTransfer, Decimal, Position, Timestamp};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

/// Store for collateral transfers and epoch positions.
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    /// Create a new store on the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        LedgerStore { pool }
    }

    /// Insert a transfer idempotently (event_key is unique).
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_transfer(&self, transfer: &CollateralTransfer) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO collateral_transfers (event_key, epoch_id, owner, timestamp, collateral, tx_hash)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(event_key) DO NOTHING
            "#,
        )
        .bind(transfer.event_key.as_str())
        .bind(transfer.epoch_id)
        .bind(transfer.owner.as_str())
        .bind(transfer.timestamp.as_i64())
        .bind(transfer.collateral.to_canonical_string())
        .bind(transfer.tx_hash.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert multiple transfers in a single transaction.
    ///
    /// Returns the number of newly inserted transfers (excludes duplicates).
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_transfers_batch(
        &self,
        transfers: &[CollateralTransfer],
    ) -> Result<usize, sqlx::Error> {
        if transfers.is_empty() {
            return Ok(0);
        }

        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for transfer in transfers {
            let result = sqlx::query(
                r#"
                INSERT INTO collateral_transfers (event_key, epoch_id, owner, timestamp, collateral, tx_hash)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(event_key) DO NOTHING
                "#,
            )
            .bind(transfer.event_key.as_str())
            .bind(transfer.epoch_id)
            .bind(transfer.owner.as_str())
            .bind(transfer.timestamp.as_i64())
            .bind(transfer.collateral.to_canonical_string())
            .bind(transfer.tx_hash.as_deref())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// Transfers for one owner within an epoch, in event order.
    pub async fn transfers_for_owner(
        &self,
        epoch_id: i64,
        owner: &Address,
    ) -> Result<Vec<CollateralTransfer>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT event_key, epoch_id, owner, timestamp, collateral, tx_hash
            FROM collateral_transfers
            WHERE epoch_id = ? AND owner = ?
            ORDER BY timestamp ASC, event_key ASC
            "#,
        )
        .bind(epoch_id)
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(transfer_from_row).collect())
    }

    /// All transfers in an epoch, in event order.
    pub async fn transfers_for_epoch(
        &self,
        epoch_id: i64,
    ) -> Result<Vec<CollateralTransfer>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT event_key, epoch_id, owner, timestamp, collateral, tx_hash
            FROM collateral_transfers
            WHERE epoch_id = ?
            ORDER BY timestamp ASC, event_key ASC
            "#,
        )
        .bind(epoch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(transfer_from_row).collect())
    }

    /// Insert or update a position for its (position_id, epoch_id) key.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert_position(&self, position: &Position) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO positions (position_id, epoch_id, owner, collateral, is_settled, market_address)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(position_id, epoch_id) DO UPDATE SET
                owner = excluded.owner,
                collateral = excluded.collateral,
                is_settled = excluded.is_settled,
                market_address = excluded.market_address
            "#,
        )
        .bind(position.position_id)
        .bind(position.epoch_id)
        .bind(position.owner.as_str())
        .bind(position.collateral.to_canonical_string())
        .bind(position.is_settled as i64)
        .bind(position.market_address.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Positions for one owner within an epoch, ascending by position id.
    pub async fn positions_for_owner(
        &self,
        epoch_id: i64,
        owner: &Address,
    ) -> Result<Vec<Position>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT position_id, epoch_id, owner, collateral, is_settled, market_address
            FROM positions
            WHERE epoch_id = ? AND owner = ?
            ORDER BY position_id ASC
            "#,
        )
        .bind(epoch_id)
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(position_from_row).collect())
    }

    /// All positions in an epoch, ascending by position id.
    pub async fn positions_for_epoch(&self, epoch_id: i64) -> Result<Vec<Position>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT position_id, epoch_id, owner, collateral, is_settled, market_address
            FROM positions
            WHERE epoch_id = ?
            ORDER BY position_id ASC
            "#,
        )
        .bind(epoch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(position_from_row).collect())
    }

    /// Every owner with a transfer or a position in the epoch.
    pub async fn owners_in_epoch(&self, epoch_id: i64) -> Result<Vec<Address>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT owner FROM collateral_transfers WHERE epoch_id = ?
            UNION
            SELECT owner FROM positions WHERE epoch_id = ?
            ORDER BY owner ASC
            "#,
        )
        .bind(epoch_id)
        .bind(epoch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Address::new(row.get::<String, _>("owner")))
            .collect())
    }
}

fn transfer_from_row(row: &sqlx::sqlite::SqliteRow) -> CollateralTransfer {
    let event_key: String = row.get("event_key");
    let collateral_str: String = row.get("collateral");
    let collateral = Decimal::from_str(&collateral_str).unwrap_or_else(|e| {
        warn!(
            event_key = %event_key,
            collateral = %collateral_str,
            error = %e,
            "Failed to parse stored collateral decimal, using default"
        );
        Decimal::default()
    });

    CollateralTransfer {
        event_key,
        epoch_id: row.get("epoch_id"),
        owner: Address::new(row.get::<String, _>("owner")),
        timestamp: Timestamp::new(row.get("timestamp")),
        collateral,
        tx_hash: row.get("tx_hash"),
    }
}

fn position_from_row(row: &sqlx::sqlite::SqliteRow) -> Position {
    let position_id: i64 = row.get("position_id");
    let collateral_str: String = row.get("collateral");
    let collateral = Decimal::from_str(&collateral_str).unwrap_or_else(|e| {
        warn!(
            position_id = position_id,
            collateral = %collateral_str,
            error = %e,
            "Failed to parse stored position collateral decimal, using default"
        );
        Decimal::default()
    });

    Position {
        position_id,
        epoch_id: row.get("epoch_id"),
        owner: Address::new(row.get::<String, _>("owner")),
        collateral,
        is_settled: row.get::<i64, _>("is_settled") != 0,
        market_address: Address::new(row.get::<String, _>("market_address")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    async fn setup_test_db() -> (LedgerStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (LedgerStore::new(pool), temp_dir)
    }

    fn transfer(epoch: i64, owner: &str, ts: i64, amount: &str, tx: Option<&str>) -> CollateralTransfer {
        CollateralTransfer::new(
            epoch,
            Address::new(owner.to_string()),
            Timestamp::new(ts),
            Decimal::from_str(amount).unwrap(),
            tx.map(str::to_string),
        )
    }

    fn position(id: i64, epoch: i64, owner: &str, collateral: i64, settled: bool) -> Position {
        Position {
            position_id: id,
            epoch_id: epoch,
            owner: Address::new(owner.to_string()),
            collateral: Decimal::from_i64(collateral),
            is_settled: settled,
            market_address: Address::new("0xmarket".to_string()),
        }
    }

    #[tokio::test]
    async fn test_insert_duplicate_transfer_ignored() {
        let (store, _temp) = setup_test_db().await;
        let t = transfer(1, "0xabc", 1000, "10", Some("0xaaa"));

        assert!(store.insert_transfer(&t).await.unwrap());
        assert!(!store.insert_transfer(&t).await.unwrap());
    }

    #[tokio::test]
    async fn test_transfers_scoped_by_epoch_and_owner() {
        let (store, _temp) = setup_test_db().await;
        let inserted = store
            .insert_transfers_batch(&[
                transfer(1, "0xabc", 1000, "10", Some("0xaaa")),
                transfer(1, "0xabc", 2000, "-4", Some("0xbbb")),
                transfer(1, "0xdef", 1500, "7", Some("0xccc")),
                transfer(2, "0xabc", 1000, "99", Some("0xddd")),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 4);

        let abc = store
            .transfers_for_owner(1, &Address::new("0xabc".to_string()))
            .await
            .unwrap();
        assert_eq!(abc.len(), 2);
        assert_eq!(abc[0].collateral, Decimal::from_i64(10));
        assert_eq!(abc[1].collateral, Decimal::from_i64(-4));

        let all = store.transfers_for_epoch(1).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_position_upsert_updates_in_place() {
        let (store, _temp) = setup_test_db().await;
        store.upsert_position(&position(7, 1, "0xabc", 100, false)).await.unwrap();
        store.upsert_position(&position(7, 1, "0xabc", 100, true)).await.unwrap();

        let positions = store
            .positions_for_owner(1, &Address::new("0xabc".to_string()))
            .await
            .unwrap();
        assert_eq!(positions.len(), 1);
        assert!(positions[0].is_settled);
    }

    #[tokio::test]
    async fn test_owners_in_epoch_spans_both_tables() {
        let (store, _temp) = setup_test_db().await;
        store
            .insert_transfer(&transfer(1, "0xabc", 1000, "10", Some("0xaaa")))
            .await
            .unwrap();
        store.upsert_position(&position(1, 1, "0xdef", 50, false)).await.unwrap();

        let owners = store.owners_in_epoch(1).await.unwrap();
        assert_eq!(
            owners,
            vec![
                Address::new("0xabc".to_string()),
                Address::new("0xdef".to_string())
            ]
        );
    }
}
