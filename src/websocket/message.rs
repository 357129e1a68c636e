use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::metrics_source::MetricRecord;
use crate::scope::Scope;

/// Stable close codes, in the application range (4000-4999).
pub mod close_code {
    /// Normal closure, mirrored from the transport's standard code.
    pub const NORMAL: u16 = 1000;

    pub const UNAUTHORIZED: u16 = 4001;
    pub const INVALID_SCOPE: u16 = 4002;
    pub const CAPACITY_EXCEEDED: u16 = 4003;
    /// Inbound traffic for a handle with no registry entry.
    pub const INTERNAL_DESYNC: u16 = 4004;
    pub const MESSAGE_TOO_LARGE: u16 = 4005;
    pub const MESSAGE_PROCESSING_ERROR: u16 = 4006;
    pub const IDLE_TIMEOUT: u16 = 4008;
}

/// Messages sent from client to server.
///
/// Parsed with an explicit `Unknown` arm so an unrecognized kind becomes
/// a structured error reply instead of a dropped connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Ping,
    GetMetrics,
    /// `categories` is `None` when the field is absent; the router
    /// answers that with a structured error and keeps the connection
    /// open.
    Subscribe { categories: Option<Vec<String>> },
    Unknown { kind: String },
}

#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    categories: Option<Vec<String>>,
}

impl ClientMessage {
    /// Safe parse-then-match. `Err` means malformed JSON (or a missing
    /// `type` discriminator); an unrecognized `type` parses to `Unknown`.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let raw: RawClientMessage = serde_json::from_str(raw)?;
        Ok(match raw.kind.as_str() {
            "ping" => Self::Ping,
            "get_metrics" => Self::GetMetrics,
            "subscribe" => Self::Subscribe {
                categories: raw.categories,
            },
            other => Self::Unknown {
                kind: other.to_string(),
            },
        })
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    MetricsUpdate {
        scope: Scope,
        timestamp: String,
        metrics: Vec<MetricRecord>,
        summary: SnapshotSummary,
    },
    Pong {
        timestamp: i64,
    },
    Heartbeat {
        timestamp: i64,
    },
    SubscriptionUpdate {
        categories: Vec<String>,
        metrics: Vec<MetricRecord>,
        timestamp: String,
    },
    /// Serialized without the tag: errors go out as `{"error":"..."}`.
    #[serde(untagged)]
    Error {
        error: String,
    },
}

/// Totals attached to every metrics_update.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub total: usize,
    pub scope: Scope,
    /// Omitted when the metrics source does not support the timezone
    /// capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Frames queued to a connection's transport writer.
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(ServerMessage),
    /// Server-initiated close with a stable code.
    Close { code: u16, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_kinds() {
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
        assert_eq!(
            ClientMessage::parse(r#"{"type":"get_metrics"}"#).unwrap(),
            ClientMessage::GetMetrics
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe","categories":["cpu","memory"]}"#).unwrap(),
            ClientMessage::Subscribe {
                categories: Some(vec!["cpu".into(), "memory".into()])
            }
        );
    }

    #[test]
    fn test_parse_subscribe_without_categories() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe"}"#).unwrap(),
            ClientMessage::Subscribe { categories: None }
        );
    }

    #[test]
    fn test_parse_unknown_kind() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"teleport"}"#).unwrap(),
            ClientMessage::Unknown {
                kind: "teleport".into()
            }
        );
    }

    #[test]
    fn test_parse_malformed_payload() {
        assert!(ClientMessage::parse("not json").is_err());
        assert!(ClientMessage::parse(r#"{"categories":[]}"#).is_err());
    }

    #[test]
    fn test_error_serializes_without_tag() {
        let json = ServerMessage::error("boom").to_json().unwrap();
        assert_eq!(json, r#"{"error":"boom"}"#);
    }

    #[test]
    fn test_pong_and_heartbeat_are_tagged() {
        let pong: serde_json::Value =
            serde_json::from_str(&ServerMessage::pong().to_json().unwrap()).unwrap();
        assert_eq!(pong["type"], "pong");
        assert!(pong["timestamp"].is_i64());

        let hb: serde_json::Value =
            serde_json::from_str(&ServerMessage::heartbeat().to_json().unwrap()).unwrap();
        assert_eq!(hb["type"], "heartbeat");
    }

    #[test]
    fn test_metrics_update_shape() {
        let msg = ServerMessage::MetricsUpdate {
            scope: Scope::Development,
            timestamp: Utc::now().to_rfc3339(),
            metrics: vec![],
            summary: SnapshotSummary {
                total: 0,
                scope: Scope::Development,
                timezone: None,
            },
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "metrics_update");
        assert_eq!(value["scope"], "development");
        assert_eq!(value["summary"]["total"], 0);
        // Unsupported timezone capability leaves the field out entirely
        assert!(value["summary"].get("timezone").is_none());
    }
}
