use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadence_core::web;
use cadence_core::{Config, PgStore, SchedulerService, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cadence=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("cadence starting up...");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    info!("configuration loaded (timezone: {})", config.timezone);

    // Run database migrations first
    {
        use diesel::prelude::*;
        use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
        pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("../cadence-core/migrations");

        let mut conn = diesel::PgConnection::establish(&config.database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migration failed: {}", e))?;
        info!("database migrations applied");
    }

    let store: Arc<dyn Store> = Arc::new(PgStore::connect(&config.database_url)?);
    info!("store connected");

    let service = Arc::new(SchedulerService::new(config.timezone));

    // Register tasks before initialization; they wait in the submission
    // buffer and drain once the scheduler starts.
    cadence_tasks::register(&service).await?;
    info!("tasks registered");

    service.init(store.clone()).await?;
    info!("scheduler initialized");

    // Task status server
    let router = web::router(service.clone());
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    info!("task status server listening on port {}", config.http_port);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("task status server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down...");

    if let Err(e) = service.stop(store.as_ref()).await {
        error!("shutdown persistence failed: {:#}", e);
    }
    info!("cadence has shut down.");

    Ok(())
}
