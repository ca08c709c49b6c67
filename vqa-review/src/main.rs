//! vqa-review - human validation review service
//!
//! Records automated validation results, routes uncertain ones into the
//! review queue and serves claim/release/complete to human validators.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vqa_common::config::{TomlConfig, CONFIG_ENV_VAR};
use vqa_common::db::init_database;
use vqa_review::config::RuntimeSettings;
use vqa_review::{build_router, AppState};

/// Command-line arguments for vqa-review
#[derive(Parser, Debug)]
#[command(name = "vqa-review")]
#[command(about = "Human validation review queue for voice QA results")]
#[command(version)]
struct Args {
    /// Bootstrap TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides the config file)
    #[arg(short, long, env = "VQA_DATABASE")]
    database: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "VQA_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut toml_config = TomlConfig::load(args.config.as_deref(), CONFIG_ENV_VAR)
        .context("Failed to load bootstrap configuration")?;
    if let Some(database) = args.database {
        toml_config.database_path = Some(database);
    }
    if let Some(port) = args.port {
        toml_config.port = port;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Build identification goes out before any database work
    info!(
        "Starting vqa-review v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let db_path = toml_config.database_path();
    info!("Database path: {}", db_path.display());

    let pool = match init_database(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    let settings = RuntimeSettings::load(&pool)
        .await
        .context("Failed to load runtime settings")?;

    let state = AppState::new(pool, settings);
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", toml_config.bind_address, toml_config.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                toml_config.bind_address, toml_config.port
            )
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("vqa-review listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("vqa-review stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
