//! Performance layer: candle aggregation, per-epoch PnL and the versioned
//! cache that fronts both.

use thiserror::Error;

pub mod candles;
pub mod pnl;
pub mod refresher;

pub use candles::{CandleAggregator, CandleSeries};
pub use pnl::{PnLCalculator, PnlError};
pub use refresher::PerformanceRefresher;

/// Bump whenever the cached blob layout changes. Readers treat any other
/// stored version as a miss and rebuild.
pub const STORAGE_VERSION: &str = "v1";

/// Candle widths the cache accepts, in seconds:
/// 1m, 5m, 15m, 30m, 4h, 1d, 7d, 28d.
pub const SUPPORTED_INTERVALS: [i64; 8] = [
    60, 300, 900, 1800, 14400, 86400, 604800, 2419200,
];

/// Cache section holding the candle series for a resource.
pub const CANDLES_SECTION: &str = "candles";

/// Cache section holding the PnL leaderboard for one epoch.
pub fn pnl_section(epoch_id: i64) -> String {
    format!("pnl:{}", epoch_id)
}

pub fn is_supported_interval(interval: i64) -> bool {
    SUPPORTED_INTERVALS.contains(&interval)
}

#[derive(Debug, Error)]
pub enum PerfError {
    #[error("unsupported candle interval: {0}")]
    UnsupportedInterval(i64),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("cache codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Pnl(#[from] PnlError),
}
