//! Shared agent state: the sysinfo handle, collectors, and the subscription registry.

use std::sync::Arc;
use std::time::Instant;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;

use crate::config::AgentConfig;
use crate::metrics::HostProbe;
use crate::registry::SubscriptionRegistry;

pub type SharedSystem = Arc<Mutex<System>>;

/// One persistent System with CPU specs and memory loaded, shared by the collectors.
pub fn new_shared_system() -> SharedSystem {
    let refresh_kind = RefreshKind::nothing()
        .with_cpu(CpuRefreshKind::everything())
        .with_memory(MemoryRefreshKind::everything());
    Arc::new(Mutex::new(System::new_with_specifics(refresh_kind)))
}

#[derive(Clone)]
pub struct AppState {
    pub probe: Arc<dyn HostProbe>,
    pub registry: Arc<SubscriptionRegistry>,
    pub config: Arc<AgentConfig>,
    pub hostname: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AgentConfig, probe: Arc<dyn HostProbe>) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            probe,
            registry: Arc::new(SubscriptionRegistry::new()),
            config: Arc::new(config),
            hostname,
            started_at: Instant::now(),
        }
    }
}
