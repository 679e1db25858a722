use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use grapefruit::app::log_store_summary;
use grapefruit::lint::{lint_dockerfile, service_dockerfile};
use grapefruit::{load_config, Cli, Commands, GrapefruitCrawler};
use grapefruit_dht::DhtCrawler;
use grapefruit_metrics::{start_server, MetricsService, TracingService};
use grapefruit_models::Config;
use grapefruit_storage::{MemoryTorrentStore, SqliteTorrentStore, TorrentStore};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command() {
        Commands::Dockerfile => {
            print!("{}", service_dockerfile());
            Ok(())
        }
        Commands::LintDockerfile { path, context } => {
            let violations = lint_dockerfile(&path, context.as_deref())
                .with_context(|| format!("failed to lint {}", path.display()))?;
            if violations.is_empty() {
                println!("{}: ok", path.display());
                return Ok(());
            }
            for violation in &violations {
                println!("{}: {}", path.display(), violation);
            }
            anyhow::bail!("{} problem(s) found", violations.len())
        }
        Commands::Run { dry_run } => {
            let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
            TracingService::init(&config.logging)?;
            info!("Starting Grapefruit DHT crawler");
            info!("Configuration loaded: {:?}", config);

            if dry_run {
                info!("Dry run: torrents are kept in memory");
                run(config, Arc::new(MemoryTorrentStore::new())).await
            } else {
                let store = SqliteTorrentStore::connect(&config.storage.db_url).await?;
                info!("Database connected");
                run(config, Arc::new(store)).await
            }
        }
    }
}

async fn run<S: TorrentStore>(config: Config, store: Arc<S>) -> Result<()> {
    log_store_summary(store.as_ref()).await;

    let metrics = Arc::new(MetricsService::new()?);
    let metrics_handle = if config.metrics.enabled {
        let metrics = metrics.clone();
        let bind = config.metrics.bind.clone();
        let port = config.metrics.port;
        Some(tokio::spawn(async move {
            if let Err(e) = start_server(bind, port, metrics).await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let (crawler, handle) = DhtCrawler::bind(&config.dht, metrics.clone()).await?;
    let app = Arc::new(GrapefruitCrawler::new(store, handle, metrics, config.metadata.clone()));

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };
    crawler.run(app, shutdown).await?;

    if let Some(handle) = metrics_handle {
        handle.abort();
    }
    info!("Grapefruit stopped");
    Ok(())
}
