//! Connection manager for the job-progress WebSocket.
//!
//! The manager owns the one live socket, the state machine, the reconnect
//! timer and the heartbeat. Socket tasks and timers never touch its state;
//! they enqueue [`DriverEvent`]s which [`ConnectionManager::next_signal`]
//! applies one at a time. The resulting [`Signal`]s are what the
//! [`EventRouter`](super::EventRouter) turns into subscriber events.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::reconnect::ExponentialBackoff;
use super::transport::{
    DriverEvent, OutboundFrame, SocketEvent, SocketEvents, SocketHandle, Transport,
    TungsteniteTransport, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::types::{ChannelSet, ClientIdentity, OutboundMessage};

/// Connection state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket and no pending retry.
    Disconnected,
    /// A socket is being opened or a retry is scheduled.
    Connecting,
    /// The socket is open; sends are accepted.
    Open,
    /// A normal closure was requested and is in progress.
    Closing,
}

/// Snapshot returned by [`ConnectionManager::status`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempt_count: u32,
    pub channels: ChannelSet,
}

/// Outcome of a state transition, consumed by the event router
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Opened,
    Frame(String),
    Closed {
        code: u16,
        reason: String,
        will_reconnect: bool,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    MaxAttemptsReached {
        attempts: u32,
    },
    Error(String),
}

struct PendingTimer {
    id: u64,
    task: JoinHandle<()>,
}

struct Inner {
    state: ConnectionState,
    channels: ChannelSet,
    backoff: ExponentialBackoff,
    /// Set by `disconnect`, cleared by `connect`
    manual_close: bool,
    generation: u64,
    socket: Option<SocketHandle>,
    reconnect_timer: Option<PendingTimer>,
    next_timer_id: u64,
    heartbeat: Option<JoinHandle<()>>,
    signals: VecDeque<Signal>,
}

/// Owns one live-or-dying socket at a time and the reconnection state machine
///
/// Must be created inside a tokio runtime; timers and socket tasks are
/// spawned on it.
pub struct ConnectionManager {
    config: ManagerConfig,
    client_id: ClientIdentity,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<DriverEvent>>,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    /// Create a manager that opens sockets with `tokio-tungstenite`
    pub fn new(config: ManagerConfig) -> Result<Self> {
        let transport = TungsteniteTransport::new(config.connect_timeout);
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a manager on top of a custom [`Transport`]
    pub fn with_transport(config: ManagerConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            Error::Config(format!(
                "ConnectionManager must be created inside a tokio runtime: {}",
                e
            ))
        })?;

        let client_id = ClientIdentity::generate();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        debug!(client_id = %client_id, url = %config.url, "Created connection manager");

        Ok(Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                channels: ChannelSet::new(),
                backoff: ExponentialBackoff::new(config.reconnect.clone()),
                manual_close: false,
                generation: 0,
                socket: None,
                reconnect_timer: None,
                next_timer_id: 0,
                heartbeat: None,
                signals: VecDeque::new(),
            }),
            config,
            client_id,
            transport,
            runtime,
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
        })
    }

    pub fn client_id(&self) -> &ClientIdentity {
        &self.client_id
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn status(&self) -> ConnectionStatus {
        let inner = self.inner.lock();
        ConnectionStatus {
            state: inner.state,
            attempt_count: inner.backoff.attempts(),
            channels: inner.channels.clone(),
        }
    }

    /// Address for a connection joining `channels`
    pub fn target_url(&self, channels: &ChannelSet) -> String {
        let base = self.config.url.trim_end_matches('/');
        if channels.is_empty() {
            format!("{}/{}", base, self.client_id)
        } else {
            format!(
                "{}/{}?channels={}",
                base,
                self.client_id,
                channels.to_query_value()
            )
        }
    }

    /// Open a connection joining `channels`
    ///
    /// Ignored while a connection is already open or being established. The
    /// channel set is kept for automatic reconnects. Failures are never
    /// returned; they surface as signals and drive the retry schedule.
    pub fn connect(&self, channels: impl Into<ChannelSet>) {
        let channels = channels.into();
        let mut inner = self.inner.lock();
        match inner.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                debug!(state = ?inner.state, "Connect ignored, connection already active");
                return;
            }
            ConnectionState::Closing => {
                info!("Connect ignored, previous connection is still closing");
                return;
            }
            ConnectionState::Disconnected => {}
        }

        inner.channels = channels;
        inner.manual_close = false;
        inner.backoff.reset();
        inner.state = ConnectionState::Connecting;
        self.open_socket(&mut inner);
        self.wake_if_pending(&inner);
    }

    /// Connect again with the channels of the last `connect` call
    pub fn reconnect(&self) {
        let channels = self.inner.lock().channels.clone();
        self.connect(channels);
    }

    /// Send a payload with `timestamp` and `clientId` attached
    ///
    /// Returns `false` without writing anything unless the connection is open.
    /// Nothing is queued for later delivery.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound payload");
                return false;
            }
        };

        let inner = self.inner.lock();
        if inner.state != ConnectionState::Open {
            debug!(state = ?inner.state, "Dropping outbound message, connection is not open");
            return false;
        }
        self.write_message(&inner, OutboundMessage::from_payload(&payload))
    }

    /// Close the connection and stop all automatic reconnection
    ///
    /// Idempotent. Pending retry and heartbeat timers are cancelled before the
    /// socket is asked to close.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.manual_close = true;
        Self::cancel_reconnect(&mut inner);
        Self::stop_heartbeat(&mut inner);

        match inner.state {
            ConnectionState::Disconnected | ConnectionState::Closing => return,
            ConnectionState::Connecting | ConnectionState::Open => {}
        }

        let requested = inner.socket.as_ref().is_some_and(|socket| {
            socket.write(OutboundFrame::Close {
                code: NORMAL_CLOSURE,
                reason: "client disconnect".to_string(),
            })
        });

        if requested {
            info!(client_id = %self.client_id, "Closing WebSocket");
            inner.state = ConnectionState::Closing;
        } else {
            info!(client_id = %self.client_id, "Disconnected");
            inner.socket = None;
            inner.state = ConnectionState::Disconnected;
            inner.signals.push_back(Signal::Closed {
                code: NORMAL_CLOSURE,
                reason: "client disconnect".to_string(),
                will_reconnect: false,
            });
        }
        self.wake_if_pending(&inner);
    }

    /// Wait for the next state-machine outcome
    ///
    /// Applies queued socket and timer events until one produces a signal.
    /// Only one caller should drive this at a time; the event router does so
    /// in its dispatch loop.
    pub async fn next_signal(&self) -> Option<Signal> {
        let mut events = self.events_rx.lock().await;
        loop {
            if let Some(signal) = self.inner.lock().signals.pop_front() {
                return Some(signal);
            }
            let event = events.recv().await?;
            self.apply(event);
        }
    }

    fn apply(&self, event: DriverEvent) {
        let mut inner = self.inner.lock();
        match event {
            DriverEvent::Socket { generation, event } => {
                if generation != inner.generation || inner.socket.is_none() {
                    debug!(
                        generation,
                        current = inner.generation,
                        "Ignoring event from stale socket"
                    );
                    return;
                }
                self.on_socket_event(&mut inner, event);
            }
            DriverEvent::ReconnectDue { timer } => {
                let current = inner.reconnect_timer.as_ref().map(|pending| pending.id);
                if current != Some(timer) {
                    debug!(timer, "Ignoring cancelled reconnect timer");
                    return;
                }
                inner.reconnect_timer = None;
                if inner.manual_close || inner.state != ConnectionState::Connecting {
                    return;
                }
                info!(
                    client_id = %self.client_id,
                    attempt = inner.backoff.attempts(),
                    "Reconnecting"
                );
                self.open_socket(&mut inner);
            }
            DriverEvent::HeartbeatDue { generation } => {
                if generation != inner.generation || inner.state != ConnectionState::Open {
                    return;
                }
                debug!(generation, "Sending heartbeat ping");
                if !self.write_message(&inner, OutboundMessage::ping()) {
                    warn!(generation, "Failed to send heartbeat ping");
                }
            }
            DriverEvent::Wake => {}
        }
    }

    fn on_socket_event(&self, inner: &mut Inner, event: SocketEvent) {
        match event {
            SocketEvent::Opened => {
                if inner.state != ConnectionState::Connecting {
                    debug!(state = ?inner.state, "Socket opened after close was requested");
                    return;
                }
                info!(
                    client_id = %self.client_id,
                    channels = %inner.channels.to_query_value(),
                    "WebSocket connected"
                );
                inner.state = ConnectionState::Open;
                inner.backoff.reset();
                self.start_heartbeat(inner);
                inner.signals.push_back(Signal::Opened);
            }
            SocketEvent::Message(text) => {
                inner.signals.push_back(Signal::Frame(text));
            }
            SocketEvent::Error(message) => {
                warn!(client_id = %self.client_id, error = %message, "WebSocket error");
                inner.signals.push_back(Signal::Error(message));
            }
            SocketEvent::Closed { code, reason } => {
                self.on_closed(inner, code, reason);
            }
        }
    }

    /// Open a socket for the current generation; open failures count as a lost connection
    fn open_socket(&self, inner: &mut Inner) {
        inner.generation += 1;
        let url = self.target_url(&inner.channels);
        let events = SocketEvents::new(inner.generation, self.events_tx.clone());
        debug!(url = %url, generation = inner.generation, "Opening WebSocket");

        match self.transport.open(&url, events) {
            Ok(socket) => inner.socket = Some(socket),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to open WebSocket");
                inner.signals.push_back(Signal::Error(e.to_string()));
                self.on_closed(inner, ABNORMAL_CLOSURE, e.to_string());
            }
        }
    }

    fn on_closed(&self, inner: &mut Inner, code: u16, reason: String) {
        inner.socket = None;
        Self::stop_heartbeat(inner);

        if inner.manual_close || inner.state == ConnectionState::Closing || code == NORMAL_CLOSURE
        {
            info!(client_id = %self.client_id, code, reason = %reason, "WebSocket closed");
            inner.state = ConnectionState::Disconnected;
            inner.signals.push_back(Signal::Closed {
                code,
                reason,
                will_reconnect: false,
            });
            return;
        }

        match inner.backoff.next_delay() {
            Some(delay) => {
                let attempt = inner.backoff.attempts();
                warn!(
                    client_id = %self.client_id,
                    code,
                    reason = %reason,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "WebSocket connection lost, scheduling reconnect"
                );
                inner.state = ConnectionState::Connecting;
                inner.signals.push_back(Signal::Closed {
                    code,
                    reason,
                    will_reconnect: true,
                });
                inner
                    .signals
                    .push_back(Signal::Reconnecting { attempt, delay });
                self.schedule_reconnect(inner, delay);
            }
            None => {
                let attempts = inner.backoff.attempts();
                error!(
                    client_id = %self.client_id,
                    attempts,
                    "Max reconnection attempts reached"
                );
                inner.state = ConnectionState::Disconnected;
                inner.signals.push_back(Signal::Closed {
                    code,
                    reason,
                    will_reconnect: false,
                });
                inner
                    .signals
                    .push_back(Signal::MaxAttemptsReached { attempts });
            }
        }
    }

    fn schedule_reconnect(&self, inner: &mut Inner, delay: Duration) {
        Self::cancel_reconnect(inner);
        inner.next_timer_id += 1;
        let id = inner.next_timer_id;
        let tx = self.events_tx.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(DriverEvent::ReconnectDue { timer: id });
        });
        inner.reconnect_timer = Some(PendingTimer { id, task });
    }

    fn cancel_reconnect(inner: &mut Inner) {
        if let Some(pending) = inner.reconnect_timer.take() {
            debug!(timer = pending.id, "Cancelling reconnect timer");
            pending.task.abort();
        }
    }

    fn start_heartbeat(&self, inner: &mut Inner) {
        Self::stop_heartbeat(inner);
        let interval = self.config.heartbeat_interval;
        let generation = inner.generation;
        let tx = self.events_tx.clone();
        let task = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(DriverEvent::HeartbeatDue { generation }).is_err() {
                    break;
                }
            }
        });
        inner.heartbeat = Some(task);
    }

    fn stop_heartbeat(inner: &mut Inner) {
        if let Some(task) = inner.heartbeat.take() {
            task.abort();
        }
    }

    fn write_message(&self, inner: &Inner, message: OutboundMessage) -> bool {
        let Some(socket) = inner.socket.as_ref() else {
            return false;
        };
        let text = match message
            .stamp(&self.client_id, chrono::Utc::now())
            .to_text()
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound message");
                return false;
            }
        };
        socket.write(OutboundFrame::Text(text))
    }

    /// Nudge a dispatch loop blocked on the driver channel
    fn wake_if_pending(&self, inner: &Inner) {
        if !inner.signals.is_empty() {
            let _ = self.events_tx.send(DriverEvent::Wake);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        Self::cancel_reconnect(inner);
        Self::stop_heartbeat(inner);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport for driving the state machine by hand.

    use super::*;

    pub(crate) struct OpenedSocket {
        pub url: String,
        pub events: SocketEvents,
        pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    }

    #[derive(Default)]
    pub(crate) struct MockTransport {
        pub sockets: Mutex<Vec<OpenedSocket>>,
        pub fail_opens: Mutex<u32>,
    }

    impl MockTransport {
        pub fn open_count(&self) -> usize {
            self.sockets.lock().len()
        }

        pub fn events(&self, index: usize) -> SocketEvents {
            self.sockets.lock()[index].events.clone()
        }

        pub fn last_events(&self) -> SocketEvents {
            let sockets = self.sockets.lock();
            sockets[sockets.len() - 1].events.clone()
        }

        pub fn url(&self, index: usize) -> String {
            self.sockets.lock()[index].url.clone()
        }

        pub fn written(&self, index: usize) -> Vec<OutboundFrame> {
            let mut sockets = self.sockets.lock();
            let mut frames = Vec::new();
            while let Ok(frame) = sockets[index].outbound.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }

    impl Transport for MockTransport {
        fn open(&self, url: &str, events: SocketEvents) -> Result<SocketHandle> {
            {
                let mut fail = self.fail_opens.lock();
                if *fail > 0 {
                    *fail -= 1;
                    return Err(Error::WebSocket("connection refused".to_string()));
                }
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.sockets.lock().push(OpenedSocket {
                url: url.to_string(),
                events,
                outbound: rx,
            });
            Ok(SocketHandle::new(tx))
        }
    }

    pub(crate) fn manager_with(
        config: ManagerConfig,
    ) -> (Arc<ConnectionManager>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::default());
        let manager = ConnectionManager::with_transport(config, transport.clone())
            .expect("valid test config");
        (Arc::new(manager), transport)
    }

    pub(crate) fn test_config() -> ManagerConfig {
        ManagerConfig::new("ws://jobs.test/ws")
            .base_delay(Duration::from_millis(3000))
            .max_delay(Duration::from_millis(30_000))
            .backoff_factor(1.5)
            .max_attempts(10)
    }
}
