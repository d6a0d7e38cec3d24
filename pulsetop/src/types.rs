//! Types that mirror the agent's JSON frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuSample {
    pub model: String,
    pub cores: usize,
    pub speed: u64,
    pub usage: u8,
    #[serde(default)]
    pub temperature: Option<i64>,
}

/// Sizes in MB.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub percentage: u8,
    #[serde(default)]
    pub available: Option<u64>,
    #[serde(default)]
    pub buffers: Option<u64>,
    #[serde(default)]
    pub cached: Option<u64>,
    #[serde(default)]
    pub swap_total: Option<u64>,
    #[serde(default)]
    pub swap_free: Option<u64>,
    #[serde(default)]
    pub swap_used: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub pid: u32,
    #[serde(default)]
    pub ppid: Option<u32>,
    pub user: String,
    pub cpu: f32,
    pub memory_mb: u64,
    #[serde(default)]
    pub memory_percent: Option<f32>,
    pub name: String,
    pub command: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu: Option<CpuSample>,
    pub memory: Option<MemorySample>,
    #[serde(default)]
    pub processes: Option<Vec<ProcessRecord>>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Subscribe,
    Unsubscribe,
    RequestUpdate,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Connected {
        timestamp: DateTime<Utc>,
        #[serde(default)]
        hostname: Option<String>,
        #[serde(default)]
        interval_ms: Option<u64>,
    },
    SystemUpdate(Snapshot),
    Error {
        message: String,
    },
}
