use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::ClientIdentity;
use crate::error::Result;

/// Discriminator carried in the `type` field of every server frame
///
/// Unrecognised tags are kept verbatim in [`MessageType::Unknown`] so they can be
/// forwarded to catch-all subscribers instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Progress,
    Result,
    Complete,
    Error,
    Alert,
    Notification,
    Ready,
    Pong,
    SubscribeAck,
    Unknown(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Progress => "progress",
            MessageType::Result => "result",
            MessageType::Complete => "complete",
            MessageType::Error => "error",
            MessageType::Alert => "alert",
            MessageType::Notification => "notification",
            MessageType::Ready => "ready",
            MessageType::Pong => "pong",
            MessageType::SubscribeAck => "subscribe-ack",
            MessageType::Unknown(tag) => tag,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, MessageType::Unknown(_))
    }
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Unknown(String::new())
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "progress" => MessageType::Progress,
            "result" => MessageType::Result,
            "complete" => MessageType::Complete,
            "error" => MessageType::Error,
            "alert" => MessageType::Alert,
            "notification" => MessageType::Notification,
            "ready" => MessageType::Ready,
            "pong" => MessageType::Pong,
            "subscribe-ack" | "subscribe_ack" | "subscribed" => MessageType::SubscribeAck,
            _ => MessageType::Unknown(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Unknown(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed server frame
///
/// Only the discriminator is interpreted. The payload is passed through to
/// subscribers untouched; its shape is the server's contract.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type", default)]
    pub kind: MessageType,

    #[serde(default)]
    pub data: Option<Value>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub error: Option<String>,

    /// Server timestamp, either an RFC 3339 string or epoch milliseconds
    #[serde(default)]
    pub timestamp: Option<Value>,

    /// The whole frame as received
    #[serde(skip)]
    pub raw: Value,
}

impl InboundMessage {
    /// Parse a text frame
    ///
    /// Anything that is not a JSON object is rejected. An object without a
    /// `type` field parses as [`MessageType::Unknown`] with an empty tag.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(text)?;
        let mut message: InboundMessage = serde_json::from_value(raw.clone())?;
        message.raw = raw;
        Ok(message)
    }

    /// Payload handed to subscribers: `data` when present, otherwise the full frame
    pub fn payload(&self) -> &Value {
        match &self.data {
            Some(data) => data,
            None => &self.raw,
        }
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Outbound frame: the caller's payload plus the fields injected at send time
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    body: Map<String, Value>,
}

impl OutboundMessage {
    /// Copy a payload into a new outbound message
    ///
    /// Objects are copied field by field; any other JSON value is wrapped as
    /// `{"data": value}`.
    pub fn from_payload(payload: &Value) -> Self {
        let body = match payload {
            Value::Object(fields) => fields.clone(),
            other => {
                let mut fields = Map::new();
                fields.insert("data".to_string(), other.clone());
                fields
            }
        };
        Self { body }
    }

    /// The liveness probe sent by the heartbeat
    pub fn ping() -> Self {
        let mut body = Map::new();
        body.insert("type".to_string(), Value::String("ping".to_string()));
        Self { body }
    }

    /// Attach `timestamp` and `clientId`, overwriting caller-supplied values
    pub fn stamp(mut self, client_id: &ClientIdentity, at: DateTime<Utc>) -> Self {
        self.body.insert(
            "timestamp".to_string(),
            Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        self.body.insert(
            "clientId".to_string(),
            Value::String(client_id.as_str().to_string()),
        );
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_progress_frame() {
        let msg =
            InboundMessage::parse(r#"{"type":"progress","data":{"processed":5,"total":10}}"#)
                .unwrap();
        assert_eq!(msg.kind, MessageType::Progress);
        assert_eq!(msg.payload(), &json!({"processed": 5, "total": 10}));
        assert!(msg.error.is_none());
    }

    #[test]
    fn test_unknown_tag_is_preserved() {
        let msg = InboundMessage::parse(r#"{"type":"queue-depth","depth":3}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Unknown("queue-depth".to_string()));
        assert!(!msg.kind.is_known());
        // no data field, so subscribers get the whole frame
        assert_eq!(msg.payload(), &json!({"type": "queue-depth", "depth": 3}));
    }

    #[test]
    fn test_missing_type_parses_as_unknown() {
        let msg = InboundMessage::parse(r#"{"hello":"world"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Unknown(String::new()));
    }

    #[test]
    fn test_subscribe_ack_aliases() {
        for tag in ["subscribe-ack", "subscribe_ack", "subscribed"] {
            assert_eq!(MessageType::from(tag.to_string()), MessageType::SubscribeAck);
        }
    }

    #[test]
    fn test_error_field_accepts_non_strings() {
        let msg = InboundMessage::parse(r#"{"type":"error","error":{"code":42}}"#).unwrap();
        assert_eq!(msg.error.as_deref(), Some(r#"{"code":42}"#));

        let msg = InboundMessage::parse(r#"{"type":"error","error":"disk full"}"#).unwrap();
        assert_eq!(msg.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_rejects_malformed_and_non_object_frames() {
        assert!(InboundMessage::parse("{not json").is_err());
        assert!(InboundMessage::parse("42").is_err());
        assert!(InboundMessage::parse(r#"{"type":7}"#).is_err());
    }

    #[test]
    fn test_outbound_stamping_leaves_payload_untouched() {
        let payload = json!({"type": "cancel", "jobId": "j-1", "clientId": "spoofed"});
        let client = ClientIdentity::from("client_1_abc");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();

        let message = OutboundMessage::from_payload(&payload).stamp(&client, at);

        assert_eq!(message.get("jobId"), Some(&json!("j-1")));
        assert_eq!(message.get("clientId"), Some(&json!("client_1_abc")));
        assert_eq!(
            message.get("timestamp"),
            Some(&json!("2024-05-01T12:30:00.000Z"))
        );
        assert_eq!(payload["clientId"], json!("spoofed"));
    }

    #[test]
    fn test_outbound_wraps_scalars() {
        let message = OutboundMessage::from_payload(&json!([1, 2]));
        assert_eq!(message.get("data"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_ping_text() {
        assert_eq!(OutboundMessage::ping().to_text().unwrap(), r#"{"type":"ping"}"#);
    }
}
