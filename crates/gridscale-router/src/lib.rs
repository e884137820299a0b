//! Gridscale Router
//!
//! HTTP front end for the city registry. Requests are translated into calls
//! on the alliance engine and allied power calculator in `gridscale-domain`,
//! backed by the SQLite store from `gridscale-store`.

#![warn(missing_docs)]

pub mod config;
pub mod handlers;

use config::RouterConfig;
use gridscale_store::{SqliteStore, StoreError};
use handlers::{create_router, AppState};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Router error
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Database could not be opened
    #[error("Failed to open city store: {0}")]
    Store(#[from] StoreError),

    /// Server binding error
    #[error("Failed to bind server: {0}")]
    Bind(#[from] std::io::Error),

    /// Server error
    #[error("Server error: {0}")]
    Server(String),
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured filter. Calling this more
/// than once keeps the first subscriber.
pub fn init_tracing(config: &RouterConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Start the Router HTTP server
///
/// Opens the city store, builds the routes and serves until the process
/// exits.
pub async fn start_server(config: RouterConfig) -> Result<(), RouterError> {
    init_tracing(&config);

    info!("Starting Gridscale Router");
    info!("Bind address: {}", config.bind_addr());
    info!("Database: {}", config.database_path);

    let store = SqliteStore::new(&config.database_path)?;
    info!("City store ready ({} cities)", store.count_cities()?);

    let app = create_router(AppState::new(store));

    let listener = TcpListener::bind(&config.bind_addr()).await?;
    info!("Router listening on {}", config.bind_addr());

    axum::serve(listener, app)
        .await
        .map_err(|e| RouterError::Server(e.to_string()))?;

    Ok(())
}
