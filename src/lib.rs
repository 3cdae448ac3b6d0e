pub mod client;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod indexer;
pub mod perf;
pub mod registry;
pub mod worker;

pub use client::{BlockHeader, ClientError, MockResourceClient, ResourceClient, RpcResourceClient};
pub use config::{Config, ResourceConfig};
pub use db::{init_db, LedgerStore, PerformanceCacheStore, PriceStore, UpsertOutcome};
pub use domain::{
    Address, BlockNumber, Candle, CollateralTransfer, Decimal, PnLRecord, Position, PriceSample,
    Resource, ResourceKind, Timestamp,
};
pub use error::AppError;
pub use indexer::{BlockPriceIndexer, ContractReadIndexer, FixedFormulaIndexer, RetryPolicy};
pub use perf::{CandleAggregator, PerformanceRefresher, PnLCalculator};
pub use registry::ResourceRegistry;
pub use worker::ReindexWorker;
