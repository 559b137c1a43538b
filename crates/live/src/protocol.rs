//! # Wire Protocol
//!
//! Every frame is a JSON text frame with a mandatory `type` field.
//!
//! ```text
//! client → server                     server → client
//! ─────────────────────────────       ─────────────────────────────
//! subscribe_live_tracking             pong
//! subscribe_model_channel   {model}   status
//! unsubscribe_model_channel {model}   error          {message}
//! request_driver_location   {id,..}   webhook_event  {model, data}
//! location_response         {id,..}   request_location
//! driver_status_update                location_response
//! ping                                driver_status
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, ErrorKind, Result};

// =============================================================================
// Payloads
// =============================================================================

/// A driver's reported position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverLocation {
    pub driver_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl DriverLocation {
    /// A bare position fix.
    pub fn new(driver_id: i64, latitude: f64, longitude: f64) -> Self {
        Self {
            driver_id,
            latitude,
            longitude,
            accuracy: None,
            heading: None,
            speed: None,
            timestamp: None,
        }
    }
}

/// Vehicle position carried by a webhook event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub vehicle_id: i64,
    #[serde(default)]
    pub driver_id: Option<i64>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Trip change carried by a webhook event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripUpdate {
    #[serde(alias = "id")]
    pub trip_id: i64,
    #[serde(default)]
    pub vehicle_id: Option<i64>,
    #[serde(default)]
    pub driver_id: Option<i64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A record change pushed on a model channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub model: String,
    /// `create`, `write`, `unlink`, ...
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub record_id: Option<i64>,
    #[serde(default)]
    pub data: Value,
}

/// Someone asks this client for its driver's location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRequest {
    pub request_id: String,
    #[serde(default)]
    pub driver_id: Option<i64>,
    #[serde(default)]
    pub requester_id: Option<i64>,
}

/// Answer to a location request, echoing its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationResponse {
    pub request_id: String,
    #[serde(default)]
    pub location: Option<DriverLocation>,
}

/// A driver's availability broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverStatus {
    pub driver_id: i64,
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

// =============================================================================
// Outbound
// =============================================================================

/// Commands sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    SubscribeLiveTracking,
    SubscribeModelChannel {
        model: String,
    },
    UnsubscribeModelChannel {
        model: String,
    },
    RequestDriverLocation {
        request_id: String,
        driver_id: i64,
    },
    LocationResponse {
        request_id: String,
        location: Option<DriverLocation>,
    },
    DriverStatusUpdate {
        driver_id: i64,
        status: String,
    },
    Ping,
}

impl OutboundCommand {
    /// Wire `type` of this command.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundCommand::SubscribeLiveTracking => "subscribe_live_tracking",
            OutboundCommand::SubscribeModelChannel { .. } => "subscribe_model_channel",
            OutboundCommand::UnsubscribeModelChannel { .. } => "unsubscribe_model_channel",
            OutboundCommand::RequestDriverLocation { .. } => "request_driver_location",
            OutboundCommand::LocationResponse { .. } => "location_response",
            OutboundCommand::DriverStatusUpdate { .. } => "driver_status_update",
            OutboundCommand::Ping => "ping",
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Pong,
    Status(Value),
    Error { message: String },
    WebhookEvent(WebhookEvent),
    RequestLocation(LocationRequest),
    LocationResponse(LocationResponse),
    DriverStatus(DriverStatus),
    /// A well-formed frame whose `type` this client does not know.
    Unknown { kind: String, payload: Value },
}

impl InboundMessage {
    /// Decode a text frame.
    ///
    /// Fails on non-JSON, a missing `type`, or a known `type` whose payload
    /// does not match.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::new(ErrorKind::Protocol("Missing 'type' field".to_string())))?
            .to_string();

        let message = match kind.as_str() {
            "pong" => InboundMessage::Pong,
            "status" => InboundMessage::Status(value),
            "error" => InboundMessage::Error {
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified server error")
                    .to_string(),
            },
            "webhook_event" => InboundMessage::WebhookEvent(serde_json::from_value(value)?),
            "request_location" => InboundMessage::RequestLocation(serde_json::from_value(value)?),
            "location_response" => InboundMessage::LocationResponse(serde_json::from_value(value)?),
            "driver_status" => InboundMessage::DriverStatus(serde_json::from_value(value)?),
            _ => InboundMessage::Unknown {
                kind,
                payload: value,
            },
        };

        Ok(message)
    }

    /// Wire `type` of this message.
    pub fn type_name(&self) -> &str {
        match self {
            InboundMessage::Pong => "pong",
            InboundMessage::Status(_) => "status",
            InboundMessage::Error { .. } => "error",
            InboundMessage::WebhookEvent(_) => "webhook_event",
            InboundMessage::RequestLocation(_) => "request_location",
            InboundMessage::LocationResponse(_) => "location_response",
            InboundMessage::DriverStatus(_) => "driver_status",
            InboundMessage::Unknown { kind, .. } => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_commands_survive_server_decoding() {
        let commands = vec![
            OutboundCommand::SubscribeLiveTracking,
            OutboundCommand::SubscribeModelChannel {
                model: "fleet.vehicle".into(),
            },
            OutboundCommand::UnsubscribeModelChannel {
                model: "fleet.vehicle".into(),
            },
            OutboundCommand::RequestDriverLocation {
                request_id: "req-1".into(),
                driver_id: 9,
            },
            OutboundCommand::LocationResponse {
                request_id: "req-2".into(),
                location: Some(DriverLocation::new(9, 50.85, 4.35)),
            },
            OutboundCommand::DriverStatusUpdate {
                driver_id: 9,
                status: "available".into(),
            },
            OutboundCommand::Ping,
        ];

        for command in commands {
            let frame = command.to_json().unwrap();
            let raw: Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(raw["type"], command.type_name(), "frame: {frame}");

            let decoded: OutboundCommand = serde_json::from_str(&frame).unwrap();
            assert_eq!(decoded, command);
        }
    }

    #[test]
    fn test_command_wire_shape() {
        let frame = OutboundCommand::RequestDriverLocation {
            request_id: "abc".into(),
            driver_id: 3,
        }
        .to_json()
        .unwrap();
        let raw: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            raw,
            json!({"type": "request_driver_location", "request_id": "abc", "driver_id": 3})
        );

        let raw: Value =
            serde_json::from_str(&OutboundCommand::Ping.to_json().unwrap()).unwrap();
        assert_eq!(raw, json!({"type": "ping"}));
    }

    #[test]
    fn test_decode_known_types() {
        assert_eq!(
            InboundMessage::decode(r#"{"type":"pong"}"#).unwrap(),
            InboundMessage::Pong
        );

        let msg = InboundMessage::decode(r#"{"type":"error","message":"bad model"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Error {
                message: "bad model".into()
            }
        );

        let msg = InboundMessage::decode(
            &json!({
                "type": "location_response",
                "request_id": "r1",
                "location": {"driver_id": 4, "latitude": 1.5, "longitude": 2.5}
            })
            .to_string(),
        )
        .unwrap();
        match msg {
            InboundMessage::LocationResponse(resp) => {
                assert_eq!(resp.request_id, "r1");
                assert_eq!(resp.location, Some(DriverLocation::new(4, 1.5, 2.5)));
            }
            other => panic!("unexpected {:?}", other),
        }

        let msg = InboundMessage::decode(
            &json!({
                "type": "webhook_event",
                "model": "vehicle.position",
                "event": "write",
                "data": {"vehicle_id": 1, "latitude": 0.0, "longitude": 0.0}
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(msg.type_name(), "webhook_event");
    }

    #[test]
    fn test_decode_location_response_without_location() {
        let msg =
            InboundMessage::decode(r#"{"type":"location_response","request_id":"r9"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::LocationResponse(LocationResponse {
                request_id: "r9".into(),
                location: None,
            })
        );
    }

    #[test]
    fn test_unknown_type_is_explicit() {
        let msg = InboundMessage::decode(r#"{"type":"fleet_announcement","text":"hi"}"#).unwrap();
        match msg {
            InboundMessage::Unknown { kind, payload } => {
                assert_eq!(kind, "fleet_announcement");
                assert_eq!(payload["text"], "hi");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(matches!(
            InboundMessage::decode("not json").unwrap_err().kind,
            ErrorKind::Json(_)
        ));
        assert!(matches!(
            InboundMessage::decode(r#"{"no_type":1}"#).unwrap_err().kind,
            ErrorKind::Protocol(_)
        ));
        assert!(matches!(
            InboundMessage::decode(r#"{"type":"driver_status","driver_id":"x"}"#)
                .unwrap_err()
                .kind,
            ErrorKind::Json(_)
        ));
    }

    #[test]
    fn test_trip_update_accepts_id_alias() {
        let trip: TripUpdate =
            serde_json::from_value(json!({"id": 17, "state": "in_progress", "eta": 12})).unwrap();
        assert_eq!(trip.trip_id, 17);
        assert_eq!(trip.state.as_deref(), Some("in_progress"));
        assert_eq!(trip.extra["eta"], 12);
    }
}
