//! Domain types for the resource price indexer.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: Timestamp, BlockNumber, Address
//! - Resource model with per-kind price observation variants
//! - PriceSample, Candle and PnL entities with canonical JSON serialization

pub mod candle;
pub mod decimal;
pub mod pnl;
pub mod price;
pub mod primitives;
pub mod resource;

pub use candle::{bucket_start, Candle};
pub use decimal::Decimal;
pub use pnl::{CollateralTransfer, PnLRecord, Position};
pub use price::PriceSample;
pub use primitives::{Address, BlockNumber, Timestamp};
pub use resource::{Resource, ResourceKind};
