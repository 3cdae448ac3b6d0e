//! OHLC candles and interval bucket math.

use crate::domain::{Decimal, Timestamp};
use serde::{Deserialize, Serialize};

/// An OHLC summary of price over one interval-aligned bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    /// Bucket start in unix seconds (multiple of the interval).
    pub timestamp: Timestamp,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Candle {
    /// A forward-filled candle: all four fields carry the previous close.
    pub fn filled(timestamp: Timestamp, close: Decimal) -> Self {
        Self {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
        }
    }

    /// Fold one more price into the bucket.
    pub fn absorb(&mut self, price: Decimal) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

/// Start of the interval bucket containing `ts` (rounded down to a multiple
/// of `interval`).
pub fn bucket_start(ts: i64, interval: i64) -> i64 {
    ts.div_euclid(interval) * interval
}
