//! Shift API - online schema-change mediator
//!
//! Classifies requested DDL, walks each migration through review and
//! approval, and hands approved work to an external execution agent.

mod auth;
mod config;
mod db;
mod ddl;
mod error;
mod migration;
mod models;
mod routes;
mod state;

use crate::config::Settings;
use crate::migration::{scheduler, MemoryStore, MigrationRepository, NoInspection, PgStore, WorkflowEngine};
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Shift API...");

    let settings = Settings::load()?;
    info!("Configuration loaded");

    let store: Arc<dyn MigrationRepository> = match &settings.database {
        Some(database) => {
            let pool = db::init_pool(database).await?;
            db::create_tables(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("No database configured, migrations are kept in memory and lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = Arc::new(WorkflowEngine::new(
        store,
        Arc::new(NoInspection),
        settings.workflow.clone(),
    ));
    let sweep = scheduler::spawn(
        Arc::clone(&engine),
        Duration::from_secs(settings.workflow.sweep_interval_secs),
    );

    let state = Arc::new(AppState::new(engine, settings.clone()));
    let app = create_router(state, &settings);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));
    info!("Server listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shift_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
