use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use super::manager::{ConnectionManager, ConnectionState, ConnectionStatus, Signal};
use crate::config::ManagerConfig;
use crate::error::Result;
use crate::types::{ChannelSet, ErrorEvent, Event, EventKind, InboundMessage};

/// Subscriber callback handle
///
/// Registration and removal work on the handle's identity, so keep a clone of
/// the `Arc` around to unsubscribe later.
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Wrap a closure into a [`Callback`] handle
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Typed event fan-out on top of a [`ConnectionManager`]
///
/// The router parses inbound frames, maps their `type` to an [`Event`] and
/// invokes every subscriber registered for that event's kind, in
/// registration order. It also forwards the connect/send/disconnect surface
/// to the manager, so callers never need the manager itself.
///
/// # Example
///
/// ```no_run
/// use jobstream::websocket::{callback, EventRouter};
/// use jobstream::{EventKind, ManagerConfig};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let router = Arc::new(EventRouter::from_config(ManagerConfig::new(
///         "ws://localhost:8000/ws",
///     ))?);
///
///     router.on(
///         EventKind::Progress,
///         callback(|event| println!("progress: {:?}", event.payload())),
///     );
///
///     router.connect(["analysis", "alerts"]);
///     router.run().await;
///     Ok(())
/// }
/// ```
pub struct EventRouter {
    manager: Arc<ConnectionManager>,
    subscribers: Mutex<HashMap<EventKind, Vec<Callback>>>,
}

impl EventRouter {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Build a router over a `tokio-tungstenite` backed manager
    pub fn from_config(config: ManagerConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(ConnectionManager::new(config)?)))
    }

    /// Register `callback` for `kind`
    ///
    /// Registering the same handle twice makes it run twice per event.
    pub fn on(&self, kind: EventKind, callback: Callback) {
        self.subscribers
            .lock()
            .entry(kind)
            .or_default()
            .push(callback);
    }

    /// Remove every registration of `callback` under `kind`
    ///
    /// Returns `true` if anything was removed.
    pub fn off(&self, kind: EventKind, callback: &Callback) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(list) = subscribers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|registered| !same_callback(registered, callback));
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&kind);
        }
        removed
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.lock().get(&kind).map_or(0, Vec::len)
    }

    pub fn connect(&self, channels: impl Into<ChannelSet>) {
        self.manager.connect(channels);
    }

    pub fn reconnect(&self) {
        self.manager.reconnect();
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Send through the manager; `false` unless the connection is open
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        self.manager.send(payload)
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    /// Dispatch events until the manager is dropped
    pub async fn run(&self) {
        while self.dispatch_next().await {}
        debug!("Event router stopped");
    }

    /// Wait for the next manager signal and dispatch it
    ///
    /// Returns `false` once no further signals can arrive.
    pub async fn dispatch_next(&self) -> bool {
        match self.manager.next_signal().await {
            Some(signal) => {
                self.handle_signal(signal);
                true
            }
            None => false,
        }
    }

    fn handle_signal(&self, signal: Signal) {
        let event = match signal {
            Signal::Frame(text) => return self.handle_frame(&text),
            Signal::Opened => Event::Connected {
                client_id: self.manager.client_id().clone(),
                channels: self.manager.status().channels,
            },
            Signal::Closed {
                code,
                reason,
                will_reconnect,
            } => Event::Disconnected {
                code,
                reason,
                will_reconnect,
            },
            Signal::Reconnecting { attempt, delay } => Event::Reconnecting { attempt, delay },
            Signal::MaxAttemptsReached { attempts } => Event::MaxReconnectAttempts { attempts },
            Signal::Error(message) => Event::Error(ErrorEvent::connection(message)),
        };
        self.dispatch(&event);
    }

    fn handle_frame(&self, text: &str) {
        let event = match InboundMessage::parse(text) {
            Ok(message) => Event::from_inbound(message),
            Err(e) => {
                warn!(
                    error = %e,
                    frame = %text.chars().take(200).collect::<String>(),
                    "Failed to parse inbound frame"
                );
                Event::Error(ErrorEvent::parse(format!(
                    "failed to parse inbound frame: {}",
                    e
                )))
            }
        };

        match &event {
            Event::Message(message) => {
                warn!(
                    message_type = %message.kind,
                    "Unrecognised message type, forwarding to message subscribers"
                );
            }
            Event::Pong(_) => trace!("Received pong"),
            _ => {}
        }
        self.dispatch(&event);
    }

    /// Invoke each subscriber for the event's kind, isolating panics
    fn dispatch(&self, event: &Event) {
        let kind = event.kind();
        // Snapshot so callbacks can (un)subscribe without deadlocking
        let subscribers = match self.subscribers.lock().get(&kind) {
            Some(list) => list.clone(),
            None => {
                trace!(kind = %kind, "No subscribers");
                return;
            }
        };

        for (index, subscriber) in subscribers.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| subscriber(event))) {
                error!(
                    kind = %kind,
                    index,
                    panic = %panic_message(panic.as_ref()),
                    "Subscriber panicked"
                );
            }
        }
    }
}

fn same_callback(a: &Callback, b: &Callback) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
