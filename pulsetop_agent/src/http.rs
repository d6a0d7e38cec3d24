//! Thin request/response routes over the collectors.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::metrics::collect_overview;
use crate::state::AppState;
use crate::types::{CpuSample, MemorySample, ProcessRecord, Snapshot, SortKey};

pub const DEFAULT_PROCESS_LIMIT: usize = 10;
pub const MAX_PROCESS_LIMIT: usize = 500;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub subscribers: usize,
    pub channels: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessQuery {
    pub limit: Option<usize>,
    pub sort: Option<String>,
}

impl ProcessQuery {
    pub fn resolve(&self) -> Result<(usize, SortKey), ApiError> {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PROCESS_LIMIT)
            .min(MAX_PROCESS_LIMIT);
        let sort = match self.sort.as_deref() {
            None | Some("") => SortKey::default(),
            Some(s) => s.parse().map_err(ApiError::BadRequest)?,
        };
        Ok((limit, sort))
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        subscribers: state.registry.subscriber_count().await,
        channels: state.registry.channel_count().await,
    })
}

pub async fn overview(State(state): State<AppState>) -> Json<Snapshot> {
    Json(collect_overview(&state).await)
}

pub async fn processes(
    State(state): State<AppState>,
    Query(q): Query<ProcessQuery>,
) -> Result<Json<Vec<ProcessRecord>>, ApiError> {
    let (limit, sort) = q.resolve()?;
    Ok(Json(state.probe.processes(limit, sort).await?))
}

pub async fn cpu(State(state): State<AppState>) -> Result<Json<CpuSample>, ApiError> {
    Ok(Json(state.probe.cpu().await?))
}

pub async fn memory(State(state): State<AppState>) -> Result<Json<MemorySample>, ApiError> {
    Ok(Json(state.probe.memory().await?))
}
