use crate::config::ConfigError;
use crate::indexer::IndexerError;
use crate::perf::PerfError;
use thiserror::Error;

/// Top-level error for worker and binary entry points.
#[derive(Debug, Error)]
pub enum AppError {
    /// Unknown resource slug; fatal to the calling operation, never retried.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error(transparent)]
    Indexer(#[from] IndexerError),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Perf(#[from] PerfError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
