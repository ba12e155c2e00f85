//! Wire types shared across the gateway and router.
//!
//! These are the only two shapes the bridge needs to understand: the raw
//! gateway frame envelope and the JSON body posted to operator sinks. Event
//! payloads themselves stay as opaque [`serde_json::Value`] — the bridge
//! never needs to know the shape of `MESSAGE_CREATE` or any other event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The envelope that wraps every Discord gateway WebSocket frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Option<serde_json::Value>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// The minimal subset of the `READY` dispatch payload the session cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyData {
    pub session_id: String,
    pub resume_gateway_url: String,
}

/// Source tag stamped on every forwarded envelope.
pub const ENVELOPE_SOURCE: &str = "discord-bridge";

/// The JSON body POSTed to a configured HTTP sink.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardedEnvelope {
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub source: &'static str,
}

impl ForwardedEnvelope {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
            source: ENVELOPE_SOURCE,
        }
    }
}
