// Binary entrypoint: load config, initialize logging, run the server

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::Arc;

use deep_research_server::build_workflow_context;
use deep_research_server::config::AppConfig;
use deep_research_server::server::{run_server, ServerAppState};
use deep_research_server::shutdown::ShutdownState;
use deep_research_server::workflow::CancelRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Config file path comes from the environment; everything else can be
    // overridden by individual variables
    let config_file = std::env::var("DEEP_RESEARCH_CONFIG")
        .ok()
        .map(PathBuf::from);

    let config = AppConfig::load(config_file.as_deref())
        .map_err(|e| anyhow!("Configuration error: {}", e))?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log.level.as_str()),
    )
    .init();

    log::info!("Initializing deep research server...");

    let workflow = Arc::new(
        build_workflow_context(&config).map_err(|e| anyhow!("Failed to initialize services: {}", e))?,
    );

    if workflow.llm.health_check().await {
        log::info!("LLM backend available");
    } else {
        log::warn!("No LLM backend answered the startup probe; continuing anyway");
    }
    if !workflow.search.is_configured() {
        log::warn!("Search is unconfigured; researcher slots will run degraded");
    }

    let shutdown_state = ShutdownState::new();
    let state = ServerAppState::new(
        Arc::new(config),
        workflow,
        Arc::new(CancelRegistry::new()),
        shutdown_state.clone(),
    );

    // Ctrl-C flips the shutdown flag; the server drains and exits
    let signal_shutdown = shutdown_state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_shutdown.request_shutdown();
        }
    });

    run_server(state).await.map_err(|e| anyhow!(e))?;

    log::info!("Server stopped");
    Ok(())
}
