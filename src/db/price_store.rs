//! Raw per-block price sample persistence.

use crate::domain::{BlockNumber, Decimal, PriceSample, Timestamp};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

/// What an upsert did to the stored row.
///
/// `Replaced` means the block was already stored with a different price (a
/// reorg from the indexer's point of view); the previous price is carried so
/// the caller can log it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Unchanged,
    Replaced { previous: Decimal },
}

/// Append/upsert store for [`PriceSample`] rows keyed by
/// (resource_slug, block_number).
pub struct PriceStore {
    pool: SqlitePool,
}

impl PriceStore {
    /// Create a new store on the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        PriceStore { pool }
    }

    /// Insert or overwrite one sample.
    ///
    /// Identical re-writes are no-ops; a differing price overwrites the row
    /// and reports the previous value.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn upsert(&self, sample: &PriceSample) -> Result<UpsertOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT price FROM resource_prices WHERE resource_slug = ? AND block_number = ?",
        )
        .bind(sample.resource_slug.as_str())
        .bind(sample.block_number.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO resource_prices (resource_slug, block_number, timestamp, price, created_at)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(sample.resource_slug.as_str())
                .bind(sample.block_number.as_i64())
                .bind(sample.timestamp.as_i64())
                .bind(sample.price.to_canonical_string())
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Inserted
            }
            Some(row) => {
                let stored: String = row.get("price");
                if stored == sample.price.to_canonical_string() {
                    UpsertOutcome::Unchanged
                } else {
                    sqlx::query(
                        r#"
                        UPDATE resource_prices SET price = ?, timestamp = ?
                        WHERE resource_slug = ? AND block_number = ?
                        "#,
                    )
                    .bind(sample.price.to_canonical_string())
                    .bind(sample.timestamp.as_i64())
                    .bind(sample.resource_slug.as_str())
                    .bind(sample.block_number.as_i64())
                    .execute(&mut *tx)
                    .await?;

                    let previous = parse_price(&stored, &sample.resource_slug);
                    UpsertOutcome::Replaced { previous }
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Samples for a resource with timestamp in `[from_ts, to_ts]`, ascending
    /// by block number. Returns what is stored; missing blocks are not
    /// interpolated.
    pub async fn range_query(
        &self,
        resource_slug: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<PriceSample>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT resource_slug, block_number, timestamp, price
            FROM resource_prices
            WHERE resource_slug = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY block_number ASC
            "#,
        )
        .bind(resource_slug)
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(sample_from_row).collect())
    }

    /// Timestamp of the newest stored sample for a resource.
    pub async fn latest_timestamp(&self, resource_slug: &str) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT MAX(timestamp) as max_ts FROM resource_prices WHERE resource_slug = ?",
        )
        .bind(resource_slug)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<Option<i64>, _>("max_ts"))
    }

    /// Timestamp of the oldest stored sample for a resource.
    pub async fn earliest_timestamp(
        &self,
        resource_slug: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT MIN(timestamp) as min_ts FROM resource_prices WHERE resource_slug = ?",
        )
        .bind(resource_slug)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<Option<i64>, _>("min_ts"))
    }

    /// Newest sample strictly before `ts`; anchors forward-fill for windows
    /// that open mid-history.
    pub async fn latest_sample_before(
        &self,
        resource_slug: &str,
        ts: i64,
    ) -> Result<Option<PriceSample>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT resource_slug, block_number, timestamp, price
            FROM resource_prices
            WHERE resource_slug = ? AND timestamp < ?
            ORDER BY block_number DESC
            LIMIT 1
            "#,
        )
        .bind(resource_slug)
        .bind(ts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(sample_from_row))
    }

    /// Highest stored block number for a resource (watch resume point).
    pub async fn max_block_number(
        &self,
        resource_slug: &str,
    ) -> Result<Option<BlockNumber>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT MAX(block_number) as max_block FROM resource_prices WHERE resource_slug = ?",
        )
        .bind(resource_slug)
        .fetch_one(&self.pool)
        .await?;

        Ok(row
            .get::<Option<i64>, _>("max_block")
            .map(BlockNumber::new))
    }

    /// Stored block numbers in `[from_block, to_block]`, ascending (gap
    /// detection for backfill).
    pub async fn block_numbers_between(
        &self,
        resource_slug: &str,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<Vec<BlockNumber>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT block_number
            FROM resource_prices
            WHERE resource_slug = ? AND block_number >= ? AND block_number <= ?
            ORDER BY block_number ASC
            "#,
        )
        .bind(resource_slug)
        .bind(from_block.as_i64())
        .bind(to_block.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| BlockNumber::new(row.get("block_number")))
            .collect())
    }

    /// Total stored samples for a resource.
    pub async fn count_samples(&self, resource_slug: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM resource_prices WHERE resource_slug = ?")
            .bind(resource_slug)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("n"))
    }
}

fn sample_from_row(row: &sqlx::sqlite::SqliteRow) -> PriceSample {
    let resource_slug: String = row.get("resource_slug");
    let block_number: i64 = row.get("block_number");
    let timestamp: i64 = row.get("timestamp");
    let price_str: String = row.get("price");
    let price = parse_price(&price_str, &resource_slug);

    PriceSample {
        resource_slug,
        block_number: BlockNumber::new(block_number),
        timestamp: Timestamp::new(timestamp),
        price,
    }
}

fn parse_price(price_str: &str, resource_slug: &str) -> Decimal {
    Decimal::from_str(price_str).unwrap_or_else(|e| {
        warn!(
            resource_slug = %resource_slug,
            price = %price_str,
            error = %e,
            "Failed to parse stored price decimal, using default"
        );
        Decimal::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    async fn setup_test_db() -> (PriceStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (PriceStore::new(pool), temp_dir)
    }

    fn sample(slug: &str, block: i64, ts: i64, price: i64) -> PriceSample {
        PriceSample::new(
            slug,
            BlockNumber::new(block),
            Timestamp::new(ts),
            Decimal::from_i64(price),
        )
    }

    #[tokio::test]
    async fn test_upsert_insert_then_unchanged() {
        let (store, _temp) = setup_test_db().await;
        let s = sample("gas", 1, 12, 100);

        assert_eq!(store.upsert(&s).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&s).await.unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(store.count_samples("gas").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_differing_price() {
        let (store, _temp) = setup_test_db().await;
        store.upsert(&sample("gas", 1, 12, 100)).await.unwrap();

        let outcome = store.upsert(&sample("gas", 1, 12, 105)).await.unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::Replaced {
                previous: Decimal::from_i64(100)
            }
        );

        let rows = store.range_query("gas", 0, 100).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, Decimal::from_i64(105));
    }

    #[tokio::test]
    async fn test_range_query_ordered_and_inclusive() {
        let (store, _temp) = setup_test_db().await;
        for (block, ts, price) in [(3, 36, 30), (1, 12, 10), (2, 24, 20), (4, 48, 40)] {
            store.upsert(&sample("gas", block, ts, price)).await.unwrap();
        }
        // Other resources stay out of the result.
        store.upsert(&sample("blob", 2, 24, 999)).await.unwrap();

        let rows = store.range_query("gas", 12, 36).await.unwrap();
        let blocks: Vec<i64> = rows.iter().map(|s| s.block_number.as_i64()).collect();
        assert_eq!(blocks, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_latest_timestamp_and_max_block() {
        let (store, _temp) = setup_test_db().await;
        assert_eq!(store.latest_timestamp("gas").await.unwrap(), None);
        assert_eq!(store.earliest_timestamp("gas").await.unwrap(), None);
        assert_eq!(store.max_block_number("gas").await.unwrap(), None);

        store.upsert(&sample("gas", 1, 12, 10)).await.unwrap();
        store.upsert(&sample("gas", 5, 60, 50)).await.unwrap();

        assert_eq!(store.latest_timestamp("gas").await.unwrap(), Some(60));
        assert_eq!(store.earliest_timestamp("gas").await.unwrap(), Some(12));
        assert_eq!(
            store.max_block_number("gas").await.unwrap(),
            Some(BlockNumber::new(5))
        );
    }

    #[tokio::test]
    async fn test_latest_sample_before() {
        let (store, _temp) = setup_test_db().await;
        store.upsert(&sample("gas", 1, 12, 10)).await.unwrap();
        store.upsert(&sample("gas", 2, 24, 20)).await.unwrap();

        let before = store.latest_sample_before("gas", 24).await.unwrap();
        assert_eq!(before.unwrap().block_number, BlockNumber::new(1));

        let at_bound = store.latest_sample_before("gas", 13).await.unwrap();
        assert_eq!(at_bound.unwrap().block_number, BlockNumber::new(1));

        // Strictly-before: a sample at exactly `ts` is not an anchor.
        let earlier = store.latest_sample_before("gas", 12).await.unwrap();
        assert!(earlier.is_none());
    }

    #[tokio::test]
    async fn test_block_numbers_between() {
        let (store, _temp) = setup_test_db().await;
        for block in [1, 2, 5, 7] {
            store
                .upsert(&sample("gas", block, block * 12, 10))
                .await
                .unwrap();
        }

        let blocks = store
            .block_numbers_between("gas", BlockNumber::new(1), BlockNumber::new(6))
            .await
            .unwrap();
        assert_eq!(
            blocks,
            vec![BlockNumber::new(1), BlockNumber::new(2), BlockNumber::new(5)]
        );
    }
}
