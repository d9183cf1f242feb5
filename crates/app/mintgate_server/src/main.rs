//! Mintgate API server binary.
//!
//! Reads configuration from the environment (and `.env`), runs migrations,
//! promotes configured superadmins and serves the API until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mintgate_api::config::ApiConfig;
use mintgate_api::{AppState, router};
use mintgate_core::store::{PgStore, Stores};
use mintgate_core::verify::{FidResolver, HubFidResolver};
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, error, info, warn};

/// Longest rate-limit window in use; older windows are dropped by maintenance.
const MAX_RATE_WINDOW: Duration = Duration::from_secs(60);

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "mintgate_server", about = "Mintgate session and access gate API")]
struct Args {
    /// Port to listen on. Overrides the port of `BIND_ADDR`.
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,mintgate_api=debug,mintgate_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env()?;
    if let Some(url) = args.database_url {
        config.pg_connection_url = url;
    }
    let mut bind_addr: SocketAddr = config.bind_addr.parse()?;
    if let Some(port) = args.port {
        bind_addr.set_port(port);
    }
    config.bind_addr = bind_addr.to_string();

    info!(
        bind_addr = %config.bind_addr,
        domain = %config.auth.domain,
        max_connections = args.max_connections,
        "starting mintgate_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(config.auth.dependency_timeout.max(Duration::from_secs(1)))
        .connect(&config.pg_connection_url)
        .await?;

    info!("running database migrations");
    mintgate_api::migrate(&pool).await?;

    let stores = Stores::from_backend(Arc::new(PgStore::new(pool)));

    let fid_resolver = match &config.farcaster_hub_url {
        Some(url) => {
            info!(hub = %url, "farcaster sign-in enabled");
            let resolver = HubFidResolver::new(url.clone(), config.auth.dependency_timeout)?;
            Some(Arc::new(resolver) as Arc<dyn FidResolver>)
        }
        None => {
            info!("FARCASTER_HUB_URL not set, farcaster sign-in disabled");
            None
        }
    };

    let superadmins = config.superadmin_addresses.clone();
    let maintenance_interval = config.maintenance_interval;
    let state = AppState::new(stores, config, fid_resolver);

    for address in &superadmins {
        let account = state.resolver.bootstrap_superadmin(address).await?;
        info!(%address, account_id = %account.id, "superadmin bootstrapped");
    }

    tokio::spawn(maintenance(state.clone(), maintenance_interval));

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("shut down");
    Ok(())
}

/// Periodically drop expired nonces, stale rate-limit windows and expired
/// cache entries.
async fn maintenance(state: AppState, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match state.stores.nonces.purge_expired().await {
            Ok(n) if n > 0 => info!(removed = n, "purged expired nonces"),
            Ok(_) => {}
            Err(e) => warn!("nonce purge failed: {e}"),
        }
        let windows = state.gate.limiter().prune(MAX_RATE_WINDOW);
        let cached = match state.resolver.cache() {
            Some(cache) => cache.prune().await,
            None => 0,
        };
        debug!(windows, cached, "maintenance sweep");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
