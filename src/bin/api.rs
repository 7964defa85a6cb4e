use loan_origination_orchestrator::{api::start_server, OrchestratorConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    let config = OrchestratorConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    info!("🚀 Loan Origination Orchestrator - API Server");
    info!("📍 Port: {}", config.port);
    info!("⏱️  Stage timeout: {:?}", config.stage_timeout);

    let orchestrator = Arc::new(config.build_orchestrator()?);

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    start_server(orchestrator, config.port).await?;

    Ok(())
}
