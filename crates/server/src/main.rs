use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mediarelay_core::{
    config::{config_path, LogFormat, LoggingConfig},
    load_config,
    publisher::{Publisher, TelegramPublisher},
    resolver::{HttpResolver, Resolver},
    transporter::{Aria2Transporter, Transporter},
    validate_config, Collaborators, Config, ItemStore, SqliteItemStore, WorkerPool,
};
use mediarelay_server::api::create_router;
use mediarelay_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(logging: &LoggingConfig) {
    let default_filter = logging
        .filter
        .clone()
        .unwrap_or_else(|| "info,tower_http=debug".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Build a client for every role that has workers. Missing credentials were
/// already rejected by validation, so any error here is fatal.
fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let workers = &config.workers;
    let mut collaborators = Collaborators::default();

    if workers.resolve.count > 0 {
        let resolver = HttpResolver::new(&config.resolver).context("Failed to create resolver")?;
        info!("Initializing HTTP resolver");
        collaborators.resolver = Some(Arc::new(resolver) as Arc<dyn Resolver>);
    }

    if workers.transfer.count > 0 {
        if let Some(aria2) = &config.transporter.aria2 {
            info!("Initializing aria2 transporter at {}", aria2.rpc_url);
            let transporter =
                Aria2Transporter::new(aria2.clone()).context("Failed to create aria2 client")?;
            collaborators.transporter = Some(Arc::new(transporter) as Arc<dyn Transporter>);
        }
    }

    if workers.publish.count > 0 {
        if let Some(telegram) = &config.publisher.telegram {
            info!("Initializing Telegram publisher for chat {}", telegram.chat_id);
            let publisher = TelegramPublisher::new(telegram.clone())
                .context("Failed to create Telegram publisher")?;
            collaborators.publisher = Some(Arc::new(publisher) as Arc<dyn Publisher>);
        }
    }

    Ok(collaborators)
}

async fn run() -> Result<()> {
    // Load configuration, then initialize logging from it
    let config_path = config_path();
    let loaded = load_config(&config_path);
    init_logging(
        &loaded
            .as_ref()
            .map(|config| config.logging.clone())
            .unwrap_or_default(),
    );
    let config =
        loaded.with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("mediarelay {} starting", VERSION);
    info!("Configuration loaded from {:?}", config_path);
    info!("Database path: {:?}", config.database.path);

    // Create SQLite item store
    let store: Arc<dyn ItemStore> = Arc::new(
        SqliteItemStore::with_busy_timeout(
            &config.database.path,
            Duration::from_millis(config.database.busy_timeout_ms),
        )
        .context("Failed to open item store")?,
    );
    info!("Item store initialized");

    // Start workers
    let collaborators = build_collaborators(&config)?;
    let pool = Arc::new(
        WorkerPool::start(&config, Arc::clone(&store), collaborators)
            .await
            .context("Failed to start workers")?,
    );
    if pool.is_empty() {
        warn!("No workers configured; only serving the API");
    }

    let grace = config.workers.shutdown_grace();

    if config.server.enabled {
        let state = Arc::new(AppState::new(
            config.clone(),
            Arc::clone(&store),
            Some(Arc::clone(&pool)),
        ));
        let app = create_router(state);

        let addr = SocketAddr::new(config.server.host, config.server.port);
        info!("Starting server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;
    } else {
        info!("HTTP endpoint disabled; waiting for shutdown signal");
        shutdown_signal().await;
    }

    info!("Shutting down...");
    pool.shutdown(grace).await;
    info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
