//! Entry point for pulsetop. Subscribes to an agent and prints each snapshot.

use tracing::info;
use tracing_subscriber::EnvFilter;

use pulsetop::config::{ClientConfig, ConfigError};
use pulsetop::reconnect::{ConnState, ReconnectManager};
use pulsetop::render::summary_line;
use pulsetop::ws::WsConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match ClientConfig::load() {
        Ok(c) => c,
        Err(ConfigError::Help(usage)) => {
            println!("{usage}");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    info!(url = %config.url, "connecting");
    let mut handle =
        ReconnectManager::new(WsConnector::new(config.url.clone()), config.reconnect).spawn();

    let mut printed = 0u64;
    loop {
        let event = tokio::select! {
            alive = handle.changed() => Some(alive),
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(alive) = event else {
            info!("interrupted, unsubscribing");
            handle.disconnect().await;
            return Ok(());
        };

        let status = handle.status();
        if status.updates > printed {
            printed = status.updates;
            if let Some(snap) = status.last_snapshot.as_deref() {
                if config.json {
                    println!("{}", serde_json::to_string(snap)?);
                } else {
                    println!("{}", summary_line(snap));
                }
            }
            if config.once {
                handle.disconnect().await;
                return Ok(());
            }
        }
        if status.state == ConnState::GaveUp || !alive {
            anyhow::bail!(
                "gave up on {} after {} failed attempts",
                config.url,
                status.attempts
            );
        }
    }
}
