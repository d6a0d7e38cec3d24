//! Channel frames exchanged over the WebSocket. Every frame is a JSON object
//! with a `type` discriminator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Snapshot;

/// Intents a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Subscribe,
    Unsubscribe,
    RequestUpdate,
}

impl ClientMessage {
    /// Decode a text frame. Bare intent names are accepted alongside JSON objects.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        match text.trim() {
            "subscribe" => Ok(ClientMessage::Subscribe),
            "unsubscribe" => Ok(ClientMessage::Unsubscribe),
            "requestUpdate" => Ok(ClientMessage::RequestUpdate),
            other => serde_json::from_str(other),
        }
    }
}

/// Frames the agent pushes to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Connected {
        timestamp: DateTime<Utc>,
        hostname: String,
        interval_ms: u64,
    },
    SystemUpdate(Snapshot),
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_intents_decode_from_json_and_bare_text() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe"}"#).unwrap(),
            ClientMessage::Subscribe
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"requestUpdate"}"#).unwrap(),
            ClientMessage::RequestUpdate
        );
        assert_eq!(
            ClientMessage::parse("unsubscribe").unwrap(),
            ClientMessage::Unsubscribe
        );
        assert!(ClientMessage::parse(r#"{"type":"kill","pid":1}"#).is_err());
        assert!(ClientMessage::parse("get_metrics").is_err());
    }

    #[test]
    fn system_update_flattens_snapshot_under_type_tag() {
        let msg = ServerMessage::SystemUpdate(Snapshot {
            timestamp: Utc::now(),
            cpu: None,
            memory: None,
            processes: Some(vec![]),
            errors: vec![],
        });
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "systemUpdate");
        assert!(v["cpu"].is_null());
        assert!(v["processes"].as_array().unwrap().is_empty());
    }

    #[test]
    fn connected_frame_carries_interval() {
        let msg = ServerMessage::Connected {
            timestamp: Utc::now(),
            hostname: "box".into(),
            interval_ms: 5000,
        };
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "connected");
        assert_eq!(v["intervalMs"], 5000);
        assert!(v["timestamp"].is_string());
    }
}
