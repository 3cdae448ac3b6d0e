//! Versioned cache orchestration for candles and PnL snapshots.

use crate::db::{PerformanceCacheEntry, PerformanceCacheStore, PriceStore};
use crate::domain::{bucket_start, Candle, PnLRecord};
use crate::perf::candles::{aggregate_candles, slice_candles, CandleSeries};
use crate::perf::pnl::PnLCalculator;
use crate::perf::{
    is_supported_interval, pnl_section, PerfError, CANDLES_SECTION, STORAGE_VERSION,
};
use chrono::Utc;
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

type CacheKey = (String, i64, String);

/// Serves candle series and PnL snapshots through the versioned cache.
///
/// At most one recomputation runs per cache key at a time: concurrent
/// readers of the same key wait behind the in-flight computation and then
/// read its freshly written entry instead of recomputing.
pub struct PerformanceRefresher {
    price_store: Arc<PriceStore>,
    cache: Arc<PerformanceCacheStore>,
    storage_version: String,
    locks: Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
    recomputes: AtomicU64,
}

impl PerformanceRefresher {
    pub fn new(price_store: Arc<PriceStore>, cache: Arc<PerformanceCacheStore>) -> Self {
        Self::with_storage_version(price_store, cache, STORAGE_VERSION)
    }

    /// Override the version tag. Cached entries written under any other tag
    /// read as misses and trigger a full rebuild.
    pub fn with_storage_version(
        price_store: Arc<PriceStore>,
        cache: Arc<PerformanceCacheStore>,
        storage_version: impl Into<String>,
    ) -> Self {
        Self {
            price_store,
            cache,
            storage_version: storage_version.into(),
            locks: Mutex::new(HashMap::new()),
            recomputes: AtomicU64::new(0),
        }
    }

    /// How many rebuild or extension computations have run.
    pub fn recompute_count(&self) -> u64 {
        self.recomputes.load(Ordering::Relaxed)
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }

    /// Candle series covering the `[from, to)` buckets of a resource.
    ///
    /// The cached blob always holds the full history; requests are served by
    /// slicing it, so a window opening mid-bucket sees the same candles a
    /// full-history reader would.
    pub async fn candles(
        &self,
        resource_slug: &str,
        interval: i64,
        from: i64,
        to: i64,
    ) -> Result<CandleSeries, PerfError> {
        if !is_supported_interval(interval) {
            return Err(PerfError::UnsupportedInterval(interval));
        }

        let key = (
            resource_slug.to_string(),
            interval,
            CANDLES_SECTION.to_string(),
        );
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let Some(store_latest) = self.price_store.latest_timestamp(resource_slug).await? else {
            return Ok(CandleSeries {
                candles: Vec::new(),
                last_update_timestamp: None,
            });
        };

        let entry = self.cache.get(resource_slug, interval, CANDLES_SECTION).await?;
        let (full, latest) = match entry {
            Some(entry) if entry.storage_version == self.storage_version => {
                match decode::<Vec<Candle>>(&entry.storage) {
                    Ok(cached) if entry.latest_timestamp >= store_latest => {
                        (cached, entry.latest_timestamp)
                    }
                    Ok(cached) => {
                        self.extend_candles(
                            resource_slug,
                            interval,
                            cached,
                            entry.latest_timestamp,
                            store_latest,
                        )
                        .await?
                    }
                    Err(e) => {
                        warn!(
                            resource_slug,
                            interval,
                            error = %e,
                            "cached candle blob unreadable, rebuilding"
                        );
                        self.rebuild_candles(resource_slug, interval, store_latest)
                            .await?
                    }
                }
            }
            Some(entry) => {
                info!(
                    resource_slug,
                    interval,
                    stored_version = %entry.storage_version,
                    current_version = %self.storage_version,
                    "cache version changed, rebuilding candles"
                );
                self.rebuild_candles(resource_slug, interval, store_latest)
                    .await?
            }
            None => {
                self.rebuild_candles(resource_slug, interval, store_latest)
                    .await?
            }
        };

        Ok(CandleSeries {
            candles: slice_candles(&full, interval, from, to),
            last_update_timestamp: Some(latest),
        })
    }

    /// Recompute the full candle history and cache it.
    async fn rebuild_candles(
        &self,
        resource_slug: &str,
        interval: i64,
        store_latest: i64,
    ) -> Result<(Vec<Candle>, i64), PerfError> {
        self.recomputes.fetch_add(1, Ordering::Relaxed);
        let earliest = self
            .price_store
            .earliest_timestamp(resource_slug)
            .await?
            .unwrap_or(store_latest);
        let samples = self
            .price_store
            .range_query(resource_slug, earliest, store_latest)
            .await?;
        let (candles, consumed) =
            aggregate_candles(&samples, None, interval, earliest, store_latest + 1);
        let latest = consumed.map(|t| t.as_i64()).unwrap_or(store_latest);
        self.put_candles(resource_slug, interval, &candles, latest)
            .await?;
        Ok((candles, latest))
    }

    /// Drop the cached tail from the high-water bucket onward and recompute
    /// only that tail. The boundary bucket is recomputed whole, from all of
    /// its samples, so the spliced series matches a full rebuild.
    async fn extend_candles(
        &self,
        resource_slug: &str,
        interval: i64,
        mut cached: Vec<Candle>,
        cached_latest: i64,
        store_latest: i64,
    ) -> Result<(Vec<Candle>, i64), PerfError> {
        self.recomputes.fetch_add(1, Ordering::Relaxed);
        let boundary = bucket_start(cached_latest, interval);
        cached.retain(|c| c.timestamp.as_i64() < boundary);

        let anchor = self
            .price_store
            .latest_sample_before(resource_slug, boundary)
            .await?
            .map(|s| s.price);
        let samples = self
            .price_store
            .range_query(resource_slug, boundary, store_latest)
            .await?;
        let (tail, consumed) =
            aggregate_candles(&samples, anchor, interval, boundary, store_latest + 1);
        cached.extend(tail);

        let latest = consumed.map(|t| t.as_i64()).unwrap_or(store_latest);
        self.put_candles(resource_slug, interval, &cached, latest)
            .await?;
        Ok((cached, latest))
    }

    async fn put_candles(
        &self,
        resource_slug: &str,
        interval: i64,
        candles: &[Candle],
        latest: i64,
    ) -> Result<(), PerfError> {
        let entry = PerformanceCacheEntry {
            resource_slug: resource_slug.to_string(),
            interval,
            json_section: CANDLES_SECTION.to_string(),
            storage_version: self.storage_version.clone(),
            latest_timestamp: latest,
            storage: encode(candles)?,
        };
        self.cache.put(&entry).await?;
        Ok(())
    }

    /// Cached PnL snapshot for one epoch.
    ///
    /// Freshness is bucketed: a snapshot computed within the current
    /// `interval` bucket is served as-is, anything older is recomputed.
    pub async fn pnl(
        &self,
        calculator: &PnLCalculator,
        resource_slug: &str,
        interval: i64,
        epoch_id: i64,
    ) -> Result<Vec<PnLRecord>, PerfError> {
        self.pnl_at(
            calculator,
            resource_slug,
            interval,
            epoch_id,
            Utc::now().timestamp(),
        )
        .await
    }

    /// As [`Self::pnl`] with an explicit clock, for deterministic refresh
    /// behavior in tests.
    pub async fn pnl_at(
        &self,
        calculator: &PnLCalculator,
        resource_slug: &str,
        interval: i64,
        epoch_id: i64,
        now: i64,
    ) -> Result<Vec<PnLRecord>, PerfError> {
        if !is_supported_interval(interval) {
            return Err(PerfError::UnsupportedInterval(interval));
        }

        let section = pnl_section(epoch_id);
        let key = (resource_slug.to_string(), interval, section.clone());
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let fresh_mark = bucket_start(now, interval);
        if let Some(entry) = self.cache.get(resource_slug, interval, &section).await? {
            if entry.storage_version == self.storage_version
                && entry.latest_timestamp == fresh_mark
            {
                match decode::<Vec<PnLRecord>>(&entry.storage) {
                    Ok(records) => return Ok(records),
                    Err(e) => {
                        warn!(
                            resource_slug,
                            interval,
                            epoch_id,
                            error = %e,
                            "cached pnl blob unreadable, rebuilding"
                        );
                    }
                }
            }
        }

        self.recomputes.fetch_add(1, Ordering::Relaxed);
        let records = calculator.calculate_epoch(epoch_id).await?;
        if records.iter().any(|r| r.incomplete) {
            warn!(
                resource_slug,
                epoch_id, "pnl snapshot incomplete, serving without caching"
            );
            return Ok(records);
        }

        let entry = PerformanceCacheEntry {
            resource_slug: resource_slug.to_string(),
            interval,
            json_section: section,
            storage_version: self.storage_version.clone(),
            latest_timestamp: fresh_mark,
            storage: encode(&records)?,
        };
        self.cache.put(&entry).await?;
        Ok(records)
    }
}

fn encode<T: ?Sized + Serialize>(value: &T) -> Result<Vec<u8>, PerfError> {
    let mut encoder = FrameEncoder::new(Vec::new());
    serde_json::to_writer(&mut encoder, value).map_err(|e| PerfError::Codec(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| PerfError::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PerfError> {
    serde_json::from_reader(FrameDecoder::new(bytes))
        .map_err(|e| PerfError::Codec(e.to_string()))
}
