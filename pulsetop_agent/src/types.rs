//! Data types sent to the client over WebSocket.
//! Keep this module minimal and stable: it defines the wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Point-in-time CPU state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuSample {
    pub model: String,
    pub cores: usize,
    /// Clock speed of the first core in MHz.
    pub speed: u64,
    /// Whole-machine utilization, always within 0..=100.
    pub usage: u8,
    /// Degrees Celsius; absent when no thermal source resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<i64>,
}

/// Point-in-time memory state. All sizes are in MB.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub percentage: u8,
    // Extended breakdown, only where the kernel exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffers: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_free: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_used: Option<u64>,
}

impl MemorySample {
    /// Build the base fields from totals in MB. `used` and `percentage` are derived.
    pub fn from_totals(total: u64, free: u64) -> Self {
        let free = free.min(total);
        let used = total - free;
        let percentage = if total == 0 {
            0
        } else {
            ((used as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            total,
            free,
            used,
            percentage,
            ..Self::default()
        }
    }
}

/// One OS process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<u32>,
    pub user: String,
    pub cpu: f32,
    /// Resident memory in MB, regardless of platform.
    pub memory_mb: u64,
    /// Share of physical memory, only where the listing reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f32>,
    pub name: String,
    pub command: String,
    pub status: String,
}

impl ProcessRecord {
    pub const UNKNOWN: &'static str = "unknown";

    /// Record with neutral defaults for everything but the pid.
    pub fn with_pid(pid: u32) -> Self {
        Self {
            pid,
            ppid: None,
            user: Self::UNKNOWN.to_string(),
            cpu: 0.0,
            memory_mb: 0,
            memory_percent: None,
            name: Self::UNKNOWN.to_string(),
            command: String::new(),
            status: Self::UNKNOWN.to_string(),
        }
    }

    /// Describes this agent process; substituted when no listing command works.
    pub fn current_process() -> Self {
        let exe = std::env::current_exe().ok();
        let name = exe
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        let command = std::env::args().collect::<Vec<_>>().join(" ");
        Self {
            name,
            command,
            status: "running".to_string(),
            ..Self::with_pid(std::process::id())
        }
    }
}

/// Sort key for process listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Cpu,
    Memory,
    Name,
    Pid,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Cpu => "cpu",
            SortKey::Memory => "memory",
            SortKey::Name => "name",
            SortKey::Pid => "pid",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(SortKey::Cpu),
            "memory" | "mem" => Ok(SortKey::Memory),
            "name" => Ok(SortKey::Name),
            "pid" => Ok(SortKey::Pid),
            other => Err(format!("unknown sort key '{other}' (expected cpu, memory, name or pid)")),
        }
    }
}

/// One broadcast unit. A failed collector nulls its own field and adds one error string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu: Option<CpuSample>,
    pub memory: Option<MemorySample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes: Option<Vec<ProcessRecord>>,
    pub errors: Vec<String>,
}
