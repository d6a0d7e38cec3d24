//! Entry point for pulsetop_agent. Parses config, starts the broadcast timer and serves.

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pulsetop_agent::config::{AgentConfig, ConfigError};
use pulsetop_agent::metrics::SystemProbe;
use pulsetop_agent::router;
use pulsetop_agent::sampler::MonitorSupervisor;
use pulsetop_agent::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match AgentConfig::load() {
        Ok(c) => c,
        Err(ConfigError::Help(usage)) => {
            println!("{usage}");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let probe = Arc::new(SystemProbe::new(&config));
    let state = AppState::new(config.clone(), probe);

    let supervisor = MonitorSupervisor::new(config.interval);
    supervisor.start(state.clone()).await;

    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    info!(addr = %listener.local_addr()?, "pulsetop_agent listening (ws path /ws)");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    supervisor.stop().await;
    Ok(())
}
