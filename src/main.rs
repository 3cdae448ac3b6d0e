use blockgauge::config::load_resources;
use blockgauge::worker::ReindexWorker;
use blockgauge::{
    init_db, Config, PriceStore, ResourceRegistry, RetryPolicy, Timestamp,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "blockgauge", about = "Resource price indexer and performance cache")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Re-index a resource from a starting unix timestamp to the chain head.
    Reindex {
        slug: String,
        start_timestamp: i64,
    },
    /// Index blocks missing from stored coverage of a time window.
    Backfill {
        slug: String,
        from_timestamp: i64,
        to_timestamp: i64,
    },
    /// Watch every configured resource for new blocks until interrupted.
    Watch,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let resources = match load_resources(&config.resources_file) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let price_store = Arc::new(PriceStore::new(pool));
    let limits = Arc::new(Semaphore::new(config.rpc_concurrency));
    let retry = RetryPolicy {
        max_elapsed: config.retry_max_elapsed,
        ..Default::default()
    };
    let registry = Arc::new(ResourceRegistry::from_configs(
        &resources,
        price_store.clone(),
        limits,
        retry.clone(),
        config.watch_poll_interval,
    ));
    tracing::info!(resources = registry.len(), "registry loaded");

    let worker = ReindexWorker::new(
        registry,
        price_store,
        retry,
        config.watch_restart_delay,
    );

    let result = match cli.command {
        Command::Reindex {
            slug,
            start_timestamp,
        } => {
            worker
                .reindex(&slug, Timestamp::new(start_timestamp))
                .await
        }
        Command::Backfill {
            slug,
            from_timestamp,
            to_timestamp,
        } => worker
            .backfill_missing(
                &slug,
                Timestamp::new(from_timestamp),
                Timestamp::new(to_timestamp),
            )
            .await
            .map(|count| {
                tracing::info!(count, "backfill finished");
            }),
        Command::Watch => {
            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown requested");
                    signal_cancel.cancel();
                }
            });

            worker.watch_all(cancel).await;
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
