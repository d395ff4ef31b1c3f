use std::sync::Arc;

use folio_api::{app, config, state};
use folio_core::dispatch::search::PgSearchIndex;
use folio_core::dispatch::webhook::HttpWebhookSender;
use folio_core::dispatch::IntegrationDispatcher;
use folio_core::events::bus::EventBus;
use folio_core::scheduler;
use folio_core::store::{PgStore, WorkflowStore};
use folio_core::time::{Clock, SystemClock};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience)
    let _ = dotenvy::dotenv();

    let config = config::AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    tracing::info!("Starting Folio publication API");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {e}"))?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;

    tracing::info!("Database migrations applied");

    let store: Arc<dyn WorkflowStore> = Arc::new(PgStore::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let event_bus = EventBus::new(config.event_bus_capacity);
    let cancel = CancellationToken::new();

    // Integrations consume the bus after commit.
    let webhooks = HttpWebhookSender::new(config.webhook_config())
        .map_err(|e| anyhow::anyhow!("Failed to build webhook client: {e}"))?;
    let dispatcher = IntegrationDispatcher::new(
        store.clone(),
        Arc::new(webhooks),
        Arc::new(PgSearchIndex::new(pool)),
        clock.clone(),
    );
    let dispatcher_task = tokio::spawn(dispatcher.run(event_bus.subscribe(), cancel.clone()));

    let state = state::AppState::new(store, clock, config.clone(), event_bus);

    let scheduler_task = match config.scheduler_interval() {
        Some(every) => Some(tokio::spawn(scheduler::run(
            state.workflow().clone(),
            every,
            config.scheduler_batch_limit,
            cancel.clone(),
        ))),
        None => {
            tracing::info!("In-process scheduler disabled");
            None
        }
    };

    let app = app(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    if let Err(e) = dispatcher_task.await {
        tracing::warn!(error = %e, "Integration dispatcher task failed");
    }
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Scheduler task failed");
        }
    }

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM for graceful shutdown.
///
/// A signal handler that cannot be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { tracing::info!("Received Ctrl+C, shutting down..."); }
        _ = terminate => { tracing::info!("Received SIGTERM, shutting down..."); }
    }
}
