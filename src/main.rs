use axum::Router;
use std::sync::Arc;
use tokio::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audit_chain::api::{audit_router, spawn_scheduled_verification, AuditService};
use audit_chain::config::AppConfig;
use audit_chain::database::SqliteChainStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audit_chain=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting audit chain service");

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize database
    let store = SqliteChainStore::connect(&config.database_url, config.max_connections).await?;
    info!("Database connected");

    let service = Arc::new(AuditService::new(Arc::new(store), &config));

    // Scheduled verification task
    if config.verify_interval_secs > 0 {
        spawn_scheduled_verification(
            service.clone(),
            Duration::from_secs(config.verify_interval_secs),
        );
        info!(
            "Scheduled verification started (every {}s)",
            config.verify_interval_secs
        );
    }

    // Build application
    let app = Router::new().merge(audit_router(service)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .into_inner(),
    );

    // Start server
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
