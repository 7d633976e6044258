//! Real-time connection to the job-progress server.
//!
//! - [`ConnectionManager`]: owns the socket, the connection state machine,
//!   reconnection with exponential backoff and the heartbeat
//! - [`EventRouter`]: parses server frames into typed [`Event`]s and fans them
//!   out to subscribers
//!
//! # Connection Management
//!
//! Abnormal closures and failed connection attempts are retried with
//! exponential backoff until [`ReconnectPolicy::max_attempts`] is spent. A
//! normal closure (code 1000) or an explicit [`ConnectionManager::disconnect`]
//! stops retrying until the next `connect`.
//!
//! The heartbeat only sends `{"type":"ping"}` while the connection is open.
//! Pong replies are delivered as [`EventKind::Pong`] events but a missing pong
//! does not trigger a reconnect.

mod manager;
mod reconnect;
mod router;
mod transport;

pub use manager::{ConnectionManager, ConnectionState, ConnectionStatus, Signal};
pub use reconnect::ReconnectPolicy;
pub use router::{callback, Callback, EventRouter};
pub use transport::{
    OutboundFrame, SocketEvent, SocketEvents, SocketHandle, Transport, TungsteniteTransport,
    ABNORMAL_CLOSURE, NORMAL_CLOSURE, NO_STATUS_RECEIVED,
};

// Re-export commonly used types for convenience
pub use crate::types::{ChannelSet, ClientIdentity, ErrorEvent, ErrorSource, Event, EventKind};
