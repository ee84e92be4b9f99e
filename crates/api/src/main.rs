//! Vitrine API server

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vitrine_api::{
    create_router,
    store::{MemoryStore, PgStore},
    AppState, Config, StoreKind,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vitrine_api=info,tower_http=info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn build_state(config: Config) -> anyhow::Result<AppState> {
    if !config.is_store_configured() {
        tracing::warn!("DATABASE_URL not set; analytics routes run unconfigured");
        return Ok(AppState::unconfigured(config));
    }

    let url = match (config.store, config.database_url.as_deref()) {
        (StoreKind::Postgres, Some(url)) => url.to_string(),
        _ => {
            tracing::warn!("Using in-memory analytics store; data is lost on restart");
            return Ok(AppState::with_memory(config, Arc::new(MemoryStore::new())));
        }
    };

    tracing::info!("Connecting to database...");
    let pool = vitrine_shared::create_pool(&url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;
    if config.run_migrations {
        vitrine_shared::run_migrations(&pool)
            .await
            .context("failed to run migrations")?;
        tracing::info!("Database migrations applied");
    }
    Ok(AppState::with_postgres(config, Arc::new(PgStore::new(pool))))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;
    let bind_address = config.bind_address.clone();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Vitrine API");

    let state = build_state(config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received");
}
