//! OHLC candle aggregation over stored price samples.

use crate::db::PriceStore;
use crate::domain::{bucket_start, Candle, Decimal, PriceSample, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A candle series plus the newest sample timestamp it reflects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleSeries {
    pub candles: Vec<Candle>,
    /// `None` when the resource has no samples at all.
    pub last_update_timestamp: Option<i64>,
}

/// Fold samples into fixed-width candles covering `[bucket_start(from), to)`.
///
/// `samples` must be ordered by block number and lie within the window;
/// block order implies non-decreasing timestamps. `prev_close` is the close
/// of the newest sample before the window and seeds forward-fill.
///
/// Buckets older than the first ever sample are omitted. Every later bucket
/// without samples repeats the previous close across all four fields. Returns
/// the candles plus the newest sample timestamp actually consumed.
pub fn aggregate_candles(
    samples: &[PriceSample],
    prev_close: Option<Decimal>,
    interval: i64,
    from: i64,
    to: i64,
) -> (Vec<Candle>, Option<Timestamp>) {
    let mut candles = Vec::new();
    let mut prev_close = prev_close;
    let mut last_consumed: Option<Timestamp> = None;
    let mut idx = 0;

    let mut t = bucket_start(from, interval);
    while t < to {
        let bucket_end = t + interval;
        let mut candle: Option<Candle> = None;
        while idx < samples.len() && samples[idx].timestamp.as_i64() < bucket_end {
            let sample = &samples[idx];
            match candle.as_mut() {
                Some(c) => c.absorb(sample.price),
                None => candle = Some(Candle::filled(Timestamp::new(t), sample.price)),
            }
            last_consumed = Some(sample.timestamp);
            idx += 1;
        }

        match candle {
            Some(c) => {
                prev_close = Some(c.close);
                candles.push(c);
            }
            None => {
                if let Some(close) = prev_close {
                    candles.push(Candle::filled(Timestamp::new(t), close));
                }
            }
        }
        t += interval;
    }

    (candles, last_consumed)
}

/// Builds candle series straight from the price store, bypassing the cache.
pub struct CandleAggregator {
    store: Arc<PriceStore>,
}

impl CandleAggregator {
    pub fn new(store: Arc<PriceStore>) -> Self {
        Self { store }
    }

    /// Aggregate stored samples into candles covering `[from, to)` buckets.
    ///
    /// The sample fetch widens to the enclosing bucket start so the first
    /// bucket sees all of its samples, and the forward-fill anchor is the
    /// newest sample before that boundary.
    pub async fn build_candles(
        &self,
        resource_slug: &str,
        interval: i64,
        from: i64,
        to: i64,
    ) -> Result<CandleSeries, sqlx::Error> {
        let window_start = bucket_start(from, interval);
        let samples = self.store.range_query(resource_slug, window_start, to).await?;
        let prev_close = self
            .store
            .latest_sample_before(resource_slug, window_start)
            .await?
            .map(|s| s.price);

        let (candles, last_consumed) =
            aggregate_candles(&samples, prev_close, interval, from, to);
        Ok(CandleSeries {
            candles,
            last_update_timestamp: last_consumed.map(|t| t.as_i64()),
        })
    }
}

/// Narrow a full-history candle series to the buckets covering `[from, to)`,
/// forward-filling past the last cached bucket when the request extends
/// beyond it.
pub(crate) fn slice_candles(
    cached: &[Candle],
    interval: i64,
    from: i64,
    to: i64,
) -> Vec<Candle> {
    let first_bucket = bucket_start(from, interval);
    let mut result: Vec<Candle> = cached
        .iter()
        .filter(|c| {
            let t = c.timestamp.as_i64();
            t >= first_bucket && t < to
        })
        .cloned()
        .collect();

    let fill_close = match result.last() {
        Some(c) => Some(c.close),
        None => cached
            .iter()
            .rev()
            .find(|c| c.timestamp.as_i64() < first_bucket)
            .map(|c| c.close),
    };

    if let Some(close) = fill_close {
        let mut t = match result.last() {
            Some(c) => c.timestamp.as_i64() + interval,
            None => first_bucket,
        };
        while t < to {
            result.push(Candle::filled(Timestamp::new(t), close));
            t += interval;
        }
    }

    result
}
