//! pulsetop_agent: samples CPU, memory and processes on the local host and streams
//! snapshots to subscribed WebSocket clients.

pub mod config;
pub mod cpu;
pub mod error;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod processes;
pub mod proto;
pub mod registry;
pub mod sampler;
pub mod state;
pub mod types;
pub mod ws;

use axum::{routing::get, Router};

use crate::state::AppState;

/// Channel endpoint plus the HTTP pass-through routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/health", get(http::health))
        .route("/api/overview", get(http::overview))
        .route("/api/processes", get(http::processes))
        .route("/api/cpu", get(http::cpu))
        .route("/api/memory", get(http::memory))
        .with_state(state)
}
