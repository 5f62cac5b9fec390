//! Folio authentication API server binary.
//!
//! Users and audit events live in PostgreSQL when `DATABASE_URL` is set,
//! otherwise in memory. Refresh tokens, OAuth state and setup tokens always
//! live in the in-process cache.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use folio_api::AppState;
use folio_api::config::ApiConfig;
use folio_core::cache::MemoryCache;
use folio_core::repository::memory::MemoryStore;
use folio_core::repository::postgres::PgStore;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "folio_api_server", about = "Folio authentication API server")]
struct Args {
    /// Address to listen on. Overrides `BIND_ADDR`.
    #[arg(long)]
    bind: Option<String>,

    /// PostgreSQL connection URL. Without it, accounts are kept in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,folio_api=debug,folio_core=debug")),
        )
        .init();

    let args = Args::parse();
    let mut config = ApiConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    let bind_addr = config.bind_addr.clone();

    let cache = Arc::new(MemoryCache::new());
    let state = match &args.database_url {
        Some(url) => {
            info!(max_connections = args.max_connections, "connecting to database");
            let pool = PgPoolOptions::new()
                .max_connections(args.max_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(url)
                .await?;

            info!("running database migrations");
            folio_api::migrate(&pool).await?;
            AppState::build(config, Arc::new(PgStore::new(pool)), cache.clone())?
        }
        None => {
            warn!("DATABASE_URL not set, accounts are kept in memory");
            AppState::build(config, Arc::new(MemoryStore::new()), cache.clone())?
        }
    };

    let shutdown = CancellationToken::new();
    let background = [
        cache.spawn_purge_task(CACHE_PURGE_INTERVAL, shutdown.clone()),
        state.rate_limiter.spawn_sweeper(shutdown.clone()),
        state.auth_rate_limiter.spawn_sweeper(shutdown.clone()),
    ];

    let app = folio_api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
        }
    })
    .await;

    shutdown.cancel();
    for handle in background {
        let _ = handle.await;
    }

    result?;
    Ok(())
}
