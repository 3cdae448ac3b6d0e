//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and schema bootstrap
//! - SQLite pragma configuration
//! - One store per persistence concern: prices, cache entries, the ledger

pub mod cache_store;
pub mod ledger;
pub mod migrations;
pub mod price_store;

pub use cache_store::{PerformanceCacheEntry, PerformanceCacheStore};
pub use ledger::LedgerStore;
pub use migrations::init_db;
pub use price_store::{PriceStore, UpsertOutcome};
