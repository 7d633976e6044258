use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::{ChannelSet, ClientIdentity, InboundMessage, MessageType};
use crate::error::Error;

/// Key under which subscribers register with the
/// [`EventRouter`](crate::websocket::EventRouter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    Result,
    Complete,
    Error,
    Alert,
    Notification,
    Ready,
    Pong,
    SubscribeAck,
    /// Catch-all for server frames with an unrecognised `type`
    Message,
    Connected,
    Disconnected,
    Reconnecting,
    MaxReconnectAttempts,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::Progress,
        EventKind::Result,
        EventKind::Complete,
        EventKind::Error,
        EventKind::Alert,
        EventKind::Notification,
        EventKind::Ready,
        EventKind::Pong,
        EventKind::SubscribeAck,
        EventKind::Message,
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::MaxReconnectAttempts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::Result => "result",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
            EventKind::Alert => "alert",
            EventKind::Notification => "notification",
            EventKind::Ready => "ready",
            EventKind::Pong => "pong",
            EventKind::SubscribeAck => "subscribe-ack",
            EventKind::Message => "message",
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Reconnecting => "reconnecting",
            EventKind::MaxReconnectAttempts => "max-reconnect-attempts",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| Error::InvalidParameter(format!("unknown event kind: {}", s)))
    }
}

/// Where an [`ErrorEvent`] originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// The server sent a frame tagged `error`
    Server,
    /// An inbound frame could not be parsed
    Parse,
    /// The transport failed (connect error, protocol error, write failure)
    Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub source: ErrorSource,
    pub message: String,
    pub data: Option<Value>,
}

impl ErrorEvent {
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            source: ErrorSource::Parse,
            message: message.into(),
            data: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            source: ErrorSource::Connection,
            message: message.into(),
            data: None,
        }
    }

    fn server(message: &InboundMessage) -> Self {
        Self {
            source: ErrorSource::Server,
            message: message
                .error
                .clone()
                .unwrap_or_else(|| "server reported an error".to_string()),
            data: Some(message.payload().clone()),
        }
    }
}

/// Typed event delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Progress(InboundMessage),
    Result(InboundMessage),
    Complete(InboundMessage),
    Alert(InboundMessage),
    Notification(InboundMessage),
    Ready(InboundMessage),
    Pong(InboundMessage),
    SubscribeAck(InboundMessage),
    Message(InboundMessage),
    Error(ErrorEvent),
    Connected {
        client_id: ClientIdentity,
        channels: ChannelSet,
    },
    Disconnected {
        code: u16,
        reason: String,
        will_reconnect: bool,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    MaxReconnectAttempts {
        attempts: u32,
    },
}

impl Event {
    /// Map a parsed frame to its event by discriminator
    pub fn from_inbound(message: InboundMessage) -> Self {
        match message.kind {
            MessageType::Progress => Event::Progress(message),
            MessageType::Result => Event::Result(message),
            MessageType::Complete => Event::Complete(message),
            MessageType::Error => Event::Error(ErrorEvent::server(&message)),
            MessageType::Alert => Event::Alert(message),
            MessageType::Notification => Event::Notification(message),
            MessageType::Ready => Event::Ready(message),
            MessageType::Pong => Event::Pong(message),
            MessageType::SubscribeAck => Event::SubscribeAck(message),
            MessageType::Unknown(_) => Event::Message(message),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Progress(_) => EventKind::Progress,
            Event::Result(_) => EventKind::Result,
            Event::Complete(_) => EventKind::Complete,
            Event::Alert(_) => EventKind::Alert,
            Event::Notification(_) => EventKind::Notification,
            Event::Ready(_) => EventKind::Ready,
            Event::Pong(_) => EventKind::Pong,
            Event::SubscribeAck(_) => EventKind::SubscribeAck,
            Event::Message(_) => EventKind::Message,
            Event::Error(_) => EventKind::Error,
            Event::Connected { .. } => EventKind::Connected,
            Event::Disconnected { .. } => EventKind::Disconnected,
            Event::Reconnecting { .. } => EventKind::Reconnecting,
            Event::MaxReconnectAttempts { .. } => EventKind::MaxReconnectAttempts,
        }
    }

    /// The server frame behind this event, if it came off the wire
    pub fn message(&self) -> Option<&InboundMessage> {
        match self {
            Event::Progress(m)
            | Event::Result(m)
            | Event::Complete(m)
            | Event::Alert(m)
            | Event::Notification(m)
            | Event::Ready(m)
            | Event::Pong(m)
            | Event::SubscribeAck(m)
            | Event::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Payload as sent by the server, unchanged
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Event::Error(error) => error.data.as_ref(),
            other => other.message().map(InboundMessage::payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_round_trips_through_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_server_error_frame_becomes_error_event() {
        let msg = InboundMessage::parse(
            r#"{"type":"error","error":"analysis failed","data":{"jobId":"j-9"}}"#,
        )
        .unwrap();
        let event = Event::from_inbound(msg);

        assert_eq!(event.kind(), EventKind::Error);
        match &event {
            Event::Error(err) => {
                assert_eq!(err.source, ErrorSource::Server);
                assert_eq!(err.message, "analysis failed");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(event.payload(), Some(&json!({"jobId": "j-9"})));
    }

    #[test]
    fn test_unknown_frame_routes_to_message() {
        let msg = InboundMessage::parse(r#"{"type":"heartbeat-stats"}"#).unwrap();
        let event = Event::from_inbound(msg);
        assert_eq!(event.kind(), EventKind::Message);
        assert_eq!(
            event.message().map(|m| m.kind.as_str()),
            Some("heartbeat-stats")
        );
    }

    #[test]
    fn test_lifecycle_events_have_no_payload() {
        let event = Event::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(4500),
        };
        assert_eq!(event.kind(), EventKind::Reconnecting);
        assert!(event.payload().is_none());
    }
}
