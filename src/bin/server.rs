// Cohort - automation core server
// Run with: cargo run --bin server

//! # Cohort Server Binary
//!
//! The production entry point for the automation core. Startup sequence:
//!
//! 1. Load `.env` and initialize structured logging
//! 2. Read configuration from the environment
//! 3. Connect the Postgres pool and bootstrap the schema
//! 4. Connect NATS (with a preflight probe and actionable hints)
//! 5. Spawn the group-update event router
//! 6. Serve the automation API until SIGINT/SIGTERM, then drain

use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

use cohort::api::AppState;
use cohort::engine::nats_bus::{EventPublisher, TaskPublisher};
use cohort::engine::storage::{InstanceReader, MembershipReader};
use cohort::{
    ensure_schema, Config, GroupEvaluator, GroupStore, GroupUpdateRouter, HttpMetadataClient,
    HttpServerBuilder, MetadataClient, NatsBus, PgInstanceReader, WorkflowOrchestrator,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Environment variables from .env are optional; production sets them
    // through the deployment system
    if let Err(e) = dotenv() {
        eprintln!("Warning: could not load .env file: {}", e);
    }

    tracing_subscriber::fmt::init();

    info!("🚀 Starting Cohort automation server...");
    info!("=====================================");

    let config = Config::from_env();
    info!("Server port: {}", config.server_port);
    info!(
        "Database: {}:{}/{}",
        config.database.host, config.database.port, config.database.name
    );
    info!("NATS URL: {}", config.nats_url);
    info!("Metadata service: {}", config.metadata_base_url);

    // Postgres: one pool shared by every handler and the evaluator
    info!("🔧 Connecting to Postgres...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database.dsn())
        .await
        .map_err(|e| {
            error!("❌ Failed to connect to Postgres: {}", e);
            e
        })?;
    ensure_schema(&pool).await?;
    info!("✅ Postgres connected, schema ensured");

    // NATS preflight: fail fast with a hint when the bus is down
    info!("📡 Connecting to NATS at {}...", config.nats_url);
    let bus = match NatsBus::connect(&config.nats_url).await {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            error!("❌ Failed to connect to NATS: {}", e);
            error!("💡 Make sure a JetStream-enabled server is running:");
            error!("   nats-server --jetstream");
            error!("   or: docker run -p 4222:4222 nats:alpine --jetstream");
            return Err(e.into());
        }
    };
    info!("✅ NATS connected, JetStream ready");

    let metadata: Arc<dyn MetadataClient> =
        Arc::new(HttpMetadataClient::with_timeout(
            &config.metadata_base_url,
            config.metadata_timeout,
        )?);

    let groups = Arc::new(GroupStore::new(pool.clone()));
    let instances: Arc<dyn InstanceReader> = Arc::new(PgInstanceReader::new(pool.clone()));

    let evaluator = Arc::new(GroupEvaluator::new(
        pool.clone(),
        Arc::clone(&metadata),
        Arc::clone(&bus) as Arc<dyn EventPublisher>,
    ));

    let orchestrator = Arc::new(WorkflowOrchestrator::new(
        Arc::clone(&metadata),
        Arc::clone(&groups) as Arc<dyn MembershipReader>,
        instances,
        Arc::clone(&bus) as Arc<dyn TaskPublisher>,
    ));

    // Group-update events feed the orchestrator in the background
    let router = GroupUpdateRouter::new(Arc::clone(&bus), Arc::clone(&orchestrator));
    tokio::spawn(async move {
        if let Err(e) = router.run().await {
            error!("group-update router stopped: {}", e);
        }
    });

    let state = AppState {
        evaluator,
        orchestrator,
        groups,
    };

    HttpServerBuilder::new()
        .with_port(config.server_port)
        .with_state(state)
        .build()?
        .run()
        .await?;

    // Bounded drain of the shared clients after the listener stops
    match tokio::time::timeout(config.shutdown_grace, bus.flush()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("NATS flush failed: {}", e),
        Err(_) => warn!("NATS flush did not finish within the grace period"),
    }
    pool.close().await;

    info!("👋 Cohort automation server stopped");
    Ok(())
}
