use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use nodepool::{
    Config, Database, Scheduler, SimulatedProber, SubscriptionSync, TestEngine,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with reduced verbosity
    let env_filter = EnvFilter::from_default_env()
        .add_directive("nodepool=info".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting node pool manager");

    let config = Config::load()?;
    info!(
        "Configuration loaded: database at {}, scheduler {}",
        config.database_path,
        if config.scheduler_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    let database = Arc::new(Database::new(&config.database_path).await?);
    info!("Database initialized");

    let sync = Arc::new(SubscriptionSync::new(database.clone(), &config));
    let test_engine = TestEngine::new(database.clone(), Arc::new(SimulatedProber::new()));
    let scheduler = Arc::new(Scheduler::new(
        database.clone(),
        sync.clone(),
        test_engine.clone(),
    ));

    if config.scheduler_enabled {
        scheduler.start().await?;
        info!("Scheduler started");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if scheduler.is_running().await {
        scheduler.stop().await?;
    }
    info!("Node pool manager stopped");

    Ok(())
}
