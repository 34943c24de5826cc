//! BerryPoker server: multi-room Texas Hold'em over HTTP + WebSocket.
//!
//! Startup order matters: open the store, recover persisted rooms, then
//! accept traffic. A bind or store failure exits non-zero before any
//! client can connect.

mod api;
mod config;
mod logging;
mod metrics;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use pico_args::Arguments;

use berrypoker::room::RoomRuntimeConfig;
use berrypoker::{DatabaseConfig, RegistryConfig, RoomRegistry, Store};

use config::ServerConfig;

const HELP: &str = "\
Run the BerryPoker server

USAGE:
  bp_server [OPTIONS]

OPTIONS:
  --bind     IP:PORT   Bind address            [default: env BERRYPOKER_HOST/PORT or 0.0.0.0:8080]
  --db-path  PATH      Durable store location  [default: env BERRYPOKER_DATABASE_PATH or ./berrypoker.db]

FLAGS:
  -h, --help           Print help information

ENVIRONMENT:
  BERRYPOKER_HOST                 Bind host
  BERRYPOKER_PORT                 Bind port
  BERRYPOKER_DATABASE_PATH        SQLite database path
  BERRYPOKER_ROOM_CLEANUP_HOURS   Idle room purge/recovery horizon
  BERRYPOKER_PERSIST_INTERVAL     Max dirty-state age in seconds
  BERRYPOKER_HAND_START_DELAY_MS  Pause between hands
  BERRYPOKER_CORS_ORIGINS         Comma-separated allowed origins, or *
  BERRYPOKER_METRICS_BIND         Prometheus exporter address (optional)
";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        return Ok(());
    }
    let bind_override: Option<SocketAddr> = pargs.opt_value_from_str("--bind")?;
    let db_path_override: Option<PathBuf> = pargs.opt_value_from_str("--db-path")?;

    logging::init();

    let config = ServerConfig::from_env(bind_override, db_path_override)
        .context("configuration error")?;
    config.validate().context("configuration validation failed")?;

    if let Some(metrics_addr) = config.metrics_bind {
        match metrics::init_metrics(metrics_addr) {
            Ok(()) => tracing::info!("metrics available at http://{metrics_addr}/metrics"),
            Err(err) => tracing::warn!("metrics disabled: {err}"),
        }
    }

    tracing::info!("opening store at {}", config.db_path.display());
    let store = Store::open(&DatabaseConfig::new(&config.db_path))
        .await
        .context("failed to open the durable store")?;

    let registry = Arc::new(RoomRegistry::new(
        store.clone(),
        RegistryConfig {
            idle_window: config.room_idle_window,
            room: RoomRuntimeConfig {
                persist_interval: config.persist_interval,
                hand_start_delay: config.hand_start_delay,
                ..RoomRuntimeConfig::default()
            },
            ..RegistryConfig::default()
        },
    ));

    let recovered = registry.recover().await.context("room recovery failed")?;
    tracing::info!("recovered {recovered} room(s) from snapshots");
    registry.start_sweeper();

    let state = api::AppState {
        registry: Arc::clone(&registry),
        store,
    };
    let app = api::create_router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!("listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down, flushing room snapshots");
    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install shutdown handler: {err}");
    }
}
