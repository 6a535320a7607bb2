use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use time::Duration;
use tracing::info;

use chatgate_core::{
    FlightMap, LedgerBook, MemorySlotStore, Orchestrator, QuotaConfig, QuotaGate, SessionCache,
};
use chatgate_relay::HttpRelay;
use chatgate_storage::{spawn_writer, ChatStorage};

mod auth;
mod cli;
mod routes;
mod server;

use crate::auth::{AnonymousOnly, HttpAuthClient};
use crate::cli::Cli;
use crate::server::AppState;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("chatgate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let dsn = resolve_dsn(&cli.dsn)?;

    let storage = ChatStorage::connect(&dsn, i64::from(cli.daily_limit)).await?;
    info!(dsn = %dsn, "db connected");
    storage.sync().await?;

    let writer = spawn_writer(storage.clone());
    info!("persistence writer running");

    let registry = routes::build_registry(cli.routes.as_deref())?;

    let sessions = Arc::new(match cli.auth_url.clone() {
        Some(url) => SessionCache::new(Arc::new(HttpAuthClient::new(url)), SessionCache::DEFAULT_TTL),
        None => SessionCache::new(Arc::new(AnonymousOnly), SessionCache::DEFAULT_TTL),
    });

    let gate = QuotaGate::new(
        LedgerBook::new(Arc::new(MemorySlotStore::new())),
        Arc::new(storage.clone()),
        QuotaConfig {
            daily_limit: cli.daily_limit,
            burst_threshold: cli.burst_threshold,
            burst_window: Duration::seconds(cli.burst_window_secs),
        },
    );

    let relay = Arc::new(HttpRelay::new(
        cli.public_key.clone(),
        HttpRelay::DEFAULT_BATCH_TIMEOUT,
    ));

    let orchestrator = Orchestrator::new(
        gate,
        sessions,
        registry,
        relay,
        FlightMap::default(),
        Some(writer),
    );

    let state = Arc::new(AppState { orchestrator });
    let app = server::router(state);

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chatgate=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resolve_dsn(input: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
    if !input.trim().is_empty() {
        return Ok(input.to_string());
    }

    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or("failed to resolve executable directory")?;
    let db_path = dir.join("chatgate.db");
    let db_path = db_path.to_string_lossy();
    let dsn = if db_path.starts_with('/') {
        let trimmed = db_path.trim_start_matches('/');
        format!("sqlite:///{}?mode=rwc", trimmed)
    } else {
        format!("sqlite://{}?mode=rwc", db_path)
    };
    Ok(dsn)
}
