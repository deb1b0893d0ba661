use anyhow::Context;
use axum::Router;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wallet_api::{config::Config, router, AppState};
use wallet_ledger::{LedgerEngine, MemoryStore, PgStore, StoreBackend};

const DEFAULT_LOG_FILTER: &str = "wallet_api=info,wallet_ledger=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!(
        backend = ?config.ledger.backend,
        port = config.server.port,
        "Starting Wallet API"
    );

    let app = match config.ledger.backend {
        StoreBackend::Postgres => {
            let store = PgStore::connect(&config.database)
                .await
                .context("Failed to connect to database")?;
            if config.database.run_migrations {
                store.migrate().await.context("Failed to run migrations")?;
            }
            let engine = LedgerEngine::with_config(store, config.engine.clone())?;
            router(AppState::new(engine, StoreBackend::Postgres))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; balances are lost on restart");
            let engine = LedgerEngine::with_config(MemoryStore::new(), config.engine.clone())?;
            router(AppState::new(engine, StoreBackend::Memory))
        }
    };

    serve(app, &config).await
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_line_number(true)
            .init();
    }
}

/// Serve until a shutdown signal, then give in-flight requests a bounded drain
async fn serve(app: Router, config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "Wallet API listening");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                stop_rx.await.ok();
            })
            .await
    });

    shutdown_signal().await;
    info!("Shutdown signal received, draining connections");
    stop_tx.send(()).ok();

    let grace = config.server.shutdown_timeout();
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined.context("Server task failed")??,
        Err(_) => warn!(timeout_secs = grace.as_secs(), "Graceful shutdown timed out"),
    }

    info!("Wallet API stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
