//! # jobstream
//!
//! A Rust client library for following analysis jobs in real time over a
//! WebSocket connection to a job-progress server.
//!
//! This library provides:
//! - A connection manager with bounded exponential-backoff reconnection
//! - An event router fanning typed server-push events out to subscribers
//! - A heartbeat ping while the connection is open
//! - An HTTP polling fallback for job status while the connection is down
//!
//! ## Features
//!
//! - **No hidden globals**: construct one [`EventRouter`] per session and share it
//! - **Type Safety**: inbound frames map to a typed [`Event`] per `type` tag
//! - **Proper Error Handling**: no panics; connection failures arrive as events,
//!   sends report success as a `bool`
//! - **Pluggable transport**: sockets are opened through the [`Transport`](websocket::Transport) trait
//!

// Public modules
pub mod client;
pub mod config;
pub mod error;
pub mod fallback;
pub mod types;
pub mod websocket;

// Internal modules
mod http;

pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use types::{
    ChannelSet, ClientIdentity, ErrorEvent, ErrorSource, Event, EventKind, InboundMessage,
    JobState, JobStatus, MessageType, OutboundMessage,
};

// Re-export clients
pub use client::JobsClient;
pub use fallback::{ConnectionProbe, PollingFallback};

// Re-export the connection surface
pub use websocket::{
    callback, Callback, ConnectionManager, ConnectionState, ConnectionStatus, EventRouter,
    ReconnectPolicy,
};
