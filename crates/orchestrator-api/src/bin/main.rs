//! Process entrypoint: init tracing, load config from the environment,
//! connect every backing store, spawn the outbox drainer, and serve.

use std::time::Duration;

use orchestrator_api::state::ServerConfig;
use orchestrator_api::{ApiConfig, ApiServer, AppState};
use orchestrator_core::config::env_vars::{env_string, env_u64};
use orchestrator_core::config::OrchestratorConfig;
use orchestrator_observability::{init_tracing, SamplingStrategy, TracingConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tracing_config = TracingConfig::new("orchestrator-api")
        .with_log_level(env_string("LOG_LEVEL", "info"))
        .with_json_output(env_string("LOG_FORMAT", "text") == "json")
        .with_sampling(SamplingStrategy::Always);
    init_tracing(tracing_config)?;

    let config = OrchestratorConfig::from_env();
    let server_config = ServerConfig::default();

    let state = AppState::connect(config, server_config).await?;

    let drain_interval = Duration::from_secs(env_u64("VECTOR_SYNC_DRAIN_INTERVAL_SECS", 5));
    state.spawn_outbox_drainer(drain_interval);

    let bind_addr: std::net::SocketAddr = env_string("BIND_ADDR", "0.0.0.0:8080").parse()?;
    let api_config = ApiConfig::default().with_addr(bind_addr);
    let server = ApiServer::new(api_config, state);

    server.run().await?;
    Ok(())
}
