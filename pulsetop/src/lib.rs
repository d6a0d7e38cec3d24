//! pulsetop client library: agent frame types, the WebSocket transport, and a
//! reconnecting subscription manager.

pub mod config;
pub mod reconnect;
pub mod render;
pub mod types;
pub mod ws;
