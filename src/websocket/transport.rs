//! Socket transports.
//!
//! A [`Transport`] opens one socket per call and reports everything that
//! happens to it through the [`SocketEvents`] it was handed. The connection
//! manager never awaits a socket directly; it only consumes those events.
//!
//! Contract for implementations:
//! - at most one [`SocketEvent::Opened`], always before any message
//! - exactly one [`SocketEvent::Closed`], after which nothing else is emitted
//! - a failure is reported as [`SocketEvent::Error`] followed by `Closed`
//! - if `open` returns `Err`, no events are emitted at all

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Close code for an intentional, normal closure
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the peer closed without a status
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Close code reported when the connection dropped without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// How long to wait for the server's close reply after sending ours
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Something that happened to a socket
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    Error(String),
    Closed { code: u16, reason: String },
}

/// Frames the manager hands to a live socket
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Everything the manager's driver loop reacts to
#[derive(Debug)]
pub(crate) enum DriverEvent {
    Socket { generation: u64, event: SocketEvent },
    ReconnectDue { timer: u64 },
    HeartbeatDue { generation: u64 },
    /// Signals were queued outside the driver loop
    Wake,
}

/// Event sink handed to a transport for one socket
#[derive(Debug, Clone)]
pub struct SocketEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<DriverEvent>,
}

impl SocketEvents {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<DriverEvent>) -> Self {
        Self { generation, tx }
    }

    /// Identifies the socket this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event; returns `false` once the manager is gone
    pub fn emit(&self, event: SocketEvent) -> bool {
        self.tx
            .send(DriverEvent::Socket {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn opened(&self) -> bool {
        self.emit(SocketEvent::Opened)
    }

    pub fn message(&self, text: impl Into<String>) -> bool {
        self.emit(SocketEvent::Message(text.into()))
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(SocketEvent::Error(message.into()))
    }

    pub fn closed(&self, code: u16, reason: impl Into<String>) -> bool {
        self.emit(SocketEvent::Closed {
            code,
            reason: reason.into(),
        })
    }
}

/// The manager's write side of one socket
#[derive(Debug)]
pub struct SocketHandle {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
}

impl SocketHandle {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self { outbound }
    }

    pub(crate) fn write(&self, frame: OutboundFrame) -> bool {
        self.outbound.send(frame).is_ok()
    }
}

/// Opens sockets on behalf of the connection manager
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &str, events: SocketEvents) -> Result<SocketHandle>;
}

/// [`Transport`] backed by `tokio-tungstenite`
///
/// Each socket runs in its own task which owns the stream and pumps frames
/// in both directions until either side closes.
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    connect_timeout: Duration,
}

impl TungsteniteTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Transport for TungsteniteTransport {
    fn open(&self, url: &str, events: SocketEvents) -> Result<SocketHandle> {
        let request = url.into_client_request()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::WebSocket(format!("no tokio runtime: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_socket(request, self.connect_timeout, events, rx));
        Ok(SocketHandle::new(tx))
    }
}

async fn run_socket(
    request: Request,
    connect_timeout: Duration,
    events: SocketEvents,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    let generation = events.generation();
    let connect = tokio::time::timeout(connect_timeout, connect_async(request));

    let ws_stream = tokio::select! {
        result = connect => match result {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                events.error(Error::from(e).to_string());
                events.closed(ABNORMAL_CLOSURE, "connect failed");
                return;
            }
            Err(_) => {
                let after_ms = u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX);
                events.error(Error::ConnectTimeout { after_ms }.to_string());
                events.closed(ABNORMAL_CLOSURE, "connect timeout");
                return;
            }
        },
        frame = outbound.recv() => {
            // Sends are gated on Open, so only a close request can get here
            let (code, reason) = match frame {
                Some(OutboundFrame::Close { code, reason }) => (code, reason),
                _ => (NORMAL_CLOSURE, String::new()),
            };
            debug!(generation, "Socket closed before the handshake completed");
            events.closed(code, reason);
            return;
        }
    };

    events.opened();

    let (mut write, mut read) = ws_stream.split();
    let mut requested_close: Option<(u16, String)> = None;
    let close_deadline = tokio::time::sleep(Duration::MAX);
    tokio::pin!(close_deadline);

    loop {
        tokio::select! {
            frame = outbound.recv(), if requested_close.is_none() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        events.error(Error::from(e).to_string());
                        events.closed(ABNORMAL_CLOSURE, "write failed");
                        return;
                    }
                }
                Some(OutboundFrame::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!(generation, error = %e, "Failed to send close frame");
                        events.closed(code, reason);
                        return;
                    }
                    close_deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + CLOSE_GRACE);
                    requested_close = Some((code, reason));
                }
                None => {
                    // Manager dropped the handle
                    let _ = write.close().await;
                    return;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    events.message(text);
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        events.message(text);
                    }
                    Err(_) => warn!(generation, "Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (NO_STATUS_RECEIVED, String::new()),
                    };
                    events.closed(code, reason);
                    return;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // Control frames are answered by tungstenite
                }
                Some(Err(e)) => {
                    if let Some((code, reason)) = requested_close.take() {
                        events.closed(code, reason);
                    } else {
                        events.error(Error::from(e).to_string());
                        events.closed(ABNORMAL_CLOSURE, "read failed");
                    }
                    return;
                }
                None => {
                    match requested_close.take() {
                        Some((code, reason)) => events.closed(code, reason),
                        None => events.closed(ABNORMAL_CLOSURE, "stream ended"),
                    };
                    return;
                }
            },
            _ = &mut close_deadline, if requested_close.is_some() => {
                debug!(generation, "Server did not answer close frame in time");
                if let Some((code, reason)) = requested_close.take() {
                    events.closed(code, reason);
                }
                return;
            }
        }
    }
}
