//! Versioned keyed blob store for derived aggregates.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// One cached derived view.
///
/// Key = (resource_slug, interval, json_section). `storage` is an opaque
/// payload trusted only when `storage_version` matches the producing
/// algorithm; `latest_timestamp` is the high-water mark of source data the
/// payload incorporates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceCacheEntry {
    pub resource_slug: String,
    pub interval: i64,
    pub json_section: String,
    pub storage_version: String,
    pub latest_timestamp: i64,
    pub storage: Vec<u8>,
}

/// Keyed blob store with version/freshness metadata.
///
/// Knows nothing about aggregation algorithms or payload encoding.
pub struct PerformanceCacheStore {
    pool: SqlitePool,
}

impl PerformanceCacheStore {
    /// Create a new store on the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        PerformanceCacheStore { pool }
    }

    /// Fetch one entry; `None` is a cache miss.
    pub async fn get(
        &self,
        resource_slug: &str,
        interval: i64,
        json_section: &str,
    ) -> Result<Option<PerformanceCacheEntry>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT resource_slug, interval, json_section, storage_version, latest_timestamp, storage
            FROM performance_cache
            WHERE resource_slug = ? AND interval = ? AND json_section = ?
            "#,
        )
        .bind(resource_slug)
        .bind(interval)
        .bind(json_section)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| PerformanceCacheEntry {
            resource_slug: r.get("resource_slug"),
            interval: r.get("interval"),
            json_section: r.get("json_section"),
            storage_version: r.get("storage_version"),
            latest_timestamp: r.get("latest_timestamp"),
            storage: r.get("storage"),
        }))
    }

    /// Replace-whole-entry keyed upsert; never leaves a partial row.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn put(&self, entry: &PerformanceCacheEntry) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO performance_cache
                (resource_slug, interval, json_section, storage_version, latest_timestamp, storage, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_slug, interval, json_section) DO UPDATE SET
                storage_version = excluded.storage_version,
                latest_timestamp = excluded.latest_timestamp,
                storage = excluded.storage,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.resource_slug.as_str())
        .bind(entry.interval)
        .bind(entry.json_section.as_str())
        .bind(entry.storage_version.as_str())
        .bind(entry.latest_timestamp)
        .bind(entry.storage.as_slice())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    async fn setup_test_db() -> (PerformanceCacheStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (PerformanceCacheStore::new(pool), temp_dir)
    }

    fn entry(slug: &str, interval: i64, section: &str, version: &str, ts: i64) -> PerformanceCacheEntry {
        PerformanceCacheEntry {
            resource_slug: slug.to_string(),
            interval,
            json_section: section.to_string(),
            storage_version: version.to_string(),
            latest_timestamp: ts,
            storage: format!("{}:{}", section, ts).into_bytes(),
        }
    }

    #[tokio::test]
    async fn test_get_miss() {
        let (store, _temp) = setup_test_db().await;
        let result = store.get("gas", 60, "candles").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (store, _temp) = setup_test_db().await;
        let e = entry("gas", 60, "candles", "v1", 1000);
        store.put(&e).await.unwrap();

        let fetched = store.get("gas", 60, "candles").await.unwrap().unwrap();
        assert_eq!(fetched, e);
    }

    #[tokio::test]
    async fn test_put_replaces_whole_entry() {
        let (store, _temp) = setup_test_db().await;
        store.put(&entry("gas", 60, "candles", "v1", 1000)).await.unwrap();
        store.put(&entry("gas", 60, "candles", "v2", 2000)).await.unwrap();

        let fetched = store.get("gas", 60, "candles").await.unwrap().unwrap();
        assert_eq!(fetched.storage_version, "v2");
        assert_eq!(fetched.latest_timestamp, 2000);
        assert_eq!(fetched.storage, b"candles:2000".to_vec());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (store, _temp) = setup_test_db().await;
        store.put(&entry("gas", 60, "candles", "v1", 1)).await.unwrap();
        store.put(&entry("gas", 300, "candles", "v1", 2)).await.unwrap();
        store.put(&entry("gas", 60, "pnl:7", "v1", 3)).await.unwrap();
        store.put(&entry("blob", 60, "candles", "v1", 4)).await.unwrap();

        assert_eq!(
            store.get("gas", 60, "candles").await.unwrap().unwrap().latest_timestamp,
            1
        );
        assert_eq!(
            store.get("gas", 300, "candles").await.unwrap().unwrap().latest_timestamp,
            2
        );
        assert_eq!(
            store.get("gas", 60, "pnl:7").await.unwrap().unwrap().latest_timestamp,
            3
        );
        assert_eq!(
            store.get("blob", 60, "candles").await.unwrap().unwrap().latest_timestamp,
            4
        );
    }
}
