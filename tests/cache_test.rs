//! Versioned cache behavior: rebuilds, incremental extension, invalidation
//! and the single-flight refresh contract.

use blockgauge::client::MockResourceClient;
use blockgauge::db::{
    init_db, LedgerStore, PerformanceCacheEntry, PerformanceCacheStore, PriceStore,
};
use blockgauge::domain::{
    Address, BlockNumber, CollateralTransfer, Decimal, Position, PriceSample, Timestamp,
};
use blockgauge::perf::{
    pnl_section, CandleAggregator, PerfError, PerformanceRefresher, PnLCalculator,
    CANDLES_SECTION, STORAGE_VERSION,
};
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;

async fn setup() -> (SqlitePool, Arc<PriceStore>, Arc<PerformanceCacheStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    (
        pool.clone(),
        Arc::new(PriceStore::new(pool.clone())),
        Arc::new(PerformanceCacheStore::new(pool)),
        temp_dir,
    )
}

fn dec(v: i64) -> Decimal {
    Decimal::from_i64(v)
}

async fn insert(store: &PriceStore, block: i64, ts: i64, price: i64) {
    store
        .upsert(&PriceSample::new(
            "gas",
            BlockNumber::new(block),
            Timestamp::new(ts),
            dec(price),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_first_request_builds_then_cache_serves() {
    let (_pool, prices, cache, _temp) = setup().await;
    insert(&prices, 0, 0, 100).await;
    insert(&prices, 1, 50, 110).await;
    insert(&prices, 2, 130, 90).await;

    let refresher = PerformanceRefresher::new(prices.clone(), cache);
    let first = refresher.candles("gas", 60, 0, 131).await.unwrap();
    assert_eq!(refresher.recompute_count(), 1);

    let direct = CandleAggregator::new(prices)
        .build_candles("gas", 60, 0, 131)
        .await
        .unwrap();
    assert_eq!(first.candles, direct.candles);
    assert_eq!(first.last_update_timestamp, Some(130));

    // No new samples: the second request never touches the aggregator.
    let second = refresher.candles("gas", 60, 0, 131).await.unwrap();
    assert_eq!(second.candles, first.candles);
    assert_eq!(refresher.recompute_count(), 1);
}

#[tokio::test]
async fn test_incremental_extension_matches_full_rebuild() {
    let (_pool, prices, cache, _temp) = setup().await;
    for i in 0..6 {
        insert(&prices, i, i * 40, 100 + i).await;
    }

    let refresher = PerformanceRefresher::new(prices.clone(), cache);
    refresher.candles("gas", 60, 0, 201).await.unwrap();
    assert_eq!(refresher.recompute_count(), 1);

    // New blocks land, including one inside the high-water bucket.
    for i in 6..11 {
        insert(&prices, i, i * 40, 100 + i).await;
    }

    let extended = refresher.candles("gas", 60, 0, 401).await.unwrap();
    assert_eq!(refresher.recompute_count(), 2);

    let full = CandleAggregator::new(prices)
        .build_candles("gas", 60, 0, 401)
        .await
        .unwrap();
    assert_eq!(extended.candles, full.candles);
    assert_eq!(extended.last_update_timestamp, full.last_update_timestamp);
}

#[tokio::test]
async fn test_reorged_price_surfaces_once_the_chain_moves_on() {
    let (_pool, prices, cache, _temp) = setup().await;
    insert(&prices, 0, 0, 10).await;
    insert(&prices, 1, 30, 12).await;
    insert(&prices, 2, 70, 20).await;

    let refresher = PerformanceRefresher::new(prices.clone(), cache);
    let before = refresher.candles("gas", 60, 0, 71).await.unwrap();
    assert_eq!(before.candles[1].close, dec(20));

    // Block 2 reorgs to a different price at the same timestamp. The cache
    // high-water mark has not moved, so reads stay on the old blob.
    insert(&prices, 2, 70, 999).await;
    let stale = refresher.candles("gas", 60, 0, 71).await.unwrap();
    assert_eq!(stale.candles[1].close, dec(20));
    assert_eq!(refresher.recompute_count(), 1);

    // The next new block recomputes the boundary bucket from stored samples,
    // which picks up the overwritten price.
    insert(&prices, 3, 130, 25).await;
    let after = refresher.candles("gas", 60, 0, 131).await.unwrap();
    assert_eq!(refresher.recompute_count(), 2);
    assert_eq!(after.candles[1].close, dec(999));
    assert_eq!(after.candles[2].close, dec(25));
}

#[tokio::test]
async fn test_storage_version_change_forces_rebuild() {
    let (_pool, prices, cache, _temp) = setup().await;
    insert(&prices, 0, 0, 100).await;
    insert(&prices, 1, 70, 110).await;

    let v1 = PerformanceRefresher::new(prices.clone(), cache.clone());
    let old = v1.candles("gas", 60, 0, 71).await.unwrap();
    assert_eq!(v1.recompute_count(), 1);

    let v2 = PerformanceRefresher::with_storage_version(prices, cache.clone(), "v2");
    let new = v2.candles("gas", 60, 0, 71).await.unwrap();
    assert_eq!(v2.recompute_count(), 1);
    assert_eq!(new.candles, old.candles);

    // The rewritten entry carries the new tag.
    let entry = cache.get("gas", 60, CANDLES_SECTION).await.unwrap().unwrap();
    assert_eq!(entry.storage_version, "v2");
}

#[tokio::test]
async fn test_corrupt_cached_blob_is_rebuilt() {
    let (_pool, prices, cache, _temp) = setup().await;
    insert(&prices, 0, 0, 100).await;
    insert(&prices, 1, 70, 110).await;

    let refresher = PerformanceRefresher::new(prices.clone(), cache.clone());
    let good = refresher.candles("gas", 60, 0, 71).await.unwrap();

    // Clobber the blob in place, keeping version and freshness plausible.
    cache
        .put(&PerformanceCacheEntry {
            resource_slug: "gas".to_string(),
            interval: 60,
            json_section: CANDLES_SECTION.to_string(),
            storage_version: STORAGE_VERSION.to_string(),
            latest_timestamp: 70,
            storage: b"truncated garbage".to_vec(),
        })
        .await
        .unwrap();

    let recovered = refresher.candles("gas", 60, 0, 71).await.unwrap();
    assert_eq!(recovered.candles, good.candles);
    assert_eq!(refresher.recompute_count(), 2);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_computation() {
    let (_pool, prices, cache, _temp) = setup().await;
    for i in 0..500 {
        insert(&prices, i, i * 15, 100 + (i % 7)).await;
    }

    let refresher = Arc::new(PerformanceRefresher::new(prices, cache));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let refresher = refresher.clone();
        handles.push(tokio::spawn(async move {
            refresher.candles("gas", 60, 0, 10_000).await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(refresher.recompute_count(), 1);
    for result in &results[1..] {
        assert_eq!(result.candles, results[0].candles);
        assert_eq!(result.last_update_timestamp, results[0].last_update_timestamp);
    }
}

#[tokio::test]
async fn test_unsupported_interval_is_rejected() {
    let (_pool, prices, cache, _temp) = setup().await;
    let refresher = PerformanceRefresher::new(prices, cache);

    let err = refresher.candles("gas", 61, 0, 1000).await.unwrap_err();
    assert!(matches!(err, PerfError::UnsupportedInterval(61)));
}

#[tokio::test]
async fn test_empty_price_store_yields_empty_series_without_caching() {
    let (_pool, prices, cache, _temp) = setup().await;
    let refresher = PerformanceRefresher::new(prices, cache.clone());

    let series = refresher.candles("gas", 60, 0, 1000).await.unwrap();
    assert!(series.candles.is_empty());
    assert_eq!(series.last_update_timestamp, None);
    assert_eq!(refresher.recompute_count(), 0);
    assert!(cache.get("gas", 60, CANDLES_SECTION).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pnl_snapshot_reused_within_its_freshness_bucket() {
    let (pool, prices, cache, _temp) = setup().await;
    let ledger = Arc::new(LedgerStore::new(pool));
    ledger
        .insert_transfer(&CollateralTransfer::new(
            1,
            Address::new("0xa"),
            Timestamp::new(500),
            Decimal::from_str("100").unwrap(),
            None,
        ))
        .await
        .unwrap();

    let calc = PnLCalculator::new(ledger, Arc::new(MockResourceClient::new()));
    let refresher = PerformanceRefresher::new(prices, cache);

    let first = refresher.pnl_at(&calc, "gas", 60, 1, 1000).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(refresher.recompute_count(), 1);

    // Same freshness bucket: the snapshot is served as-is.
    let second = refresher.pnl_at(&calc, "gas", 60, 1, 1010).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(refresher.recompute_count(), 1);

    // Next bucket: recomputed.
    let third = refresher.pnl_at(&calc, "gas", 60, 1, 1060).await.unwrap();
    assert_eq!(third, first);
    assert_eq!(refresher.recompute_count(), 2);
}

#[tokio::test]
async fn test_incomplete_pnl_served_but_never_cached() {
    let (pool, prices, cache, _temp) = setup().await;
    let ledger = Arc::new(LedgerStore::new(pool));
    ledger
        .upsert_position(&Position {
            position_id: 5,
            epoch_id: 1,
            owner: Address::new("0xa"),
            collateral: dec(100),
            is_settled: false,
            market_address: Address::new("0xmarket"),
        })
        .await
        .unwrap();

    // No scripted contract value: every valuation attempt reverts.
    let calc = PnLCalculator::new(ledger, Arc::new(MockResourceClient::new()));
    let refresher = PerformanceRefresher::new(prices, cache.clone());

    let records = refresher.pnl_at(&calc, "gas", 60, 1, 1000).await.unwrap();
    assert!(records[0].incomplete);
    assert!(cache.get("gas", 60, &pnl_section(1)).await.unwrap().is_none());

    // The next request in the same bucket tries again instead of serving a
    // cached incomplete snapshot.
    refresher.pnl_at(&calc, "gas", 60, 1, 1000).await.unwrap();
    assert_eq!(refresher.recompute_count(), 2);
}

#[tokio::test]
async fn test_candle_and_pnl_sections_do_not_collide() {
    let (pool, prices, cache, _temp) = setup().await;
    insert(&prices, 0, 0, 100).await;

    let ledger = Arc::new(LedgerStore::new(pool));
    ledger
        .insert_transfer(&CollateralTransfer::new(
            1,
            Address::new("0xa"),
            Timestamp::new(10),
            Decimal::from_str("5").unwrap(),
            None,
        ))
        .await
        .unwrap();

    let calc = PnLCalculator::new(ledger, Arc::new(MockResourceClient::new()));
    let refresher = PerformanceRefresher::new(prices, cache.clone());

    refresher.candles("gas", 60, 0, 60).await.unwrap();
    refresher.pnl_at(&calc, "gas", 60, 1, 30).await.unwrap();
    assert_eq!(refresher.recompute_count(), 2);

    assert!(cache.get("gas", 60, CANDLES_SECTION).await.unwrap().is_some());
    assert!(cache.get("gas", 60, &pnl_section(1)).await.unwrap().is_some());
}
