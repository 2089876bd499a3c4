//! # Connection Manager
//!
//! Owns the single real-time socket for the application and drives it
//! through its lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (close) -> Disconnected -> Connecting ...
//!                                   \-> Error (auth rejected / attempts exhausted)
//! ```
//!
//! ## Core Design Principles:
//!
//! 1.  **One driver task**: all socket I/O happens inside a single spawned task
//!     that `select!`s over cancellation, keepalive expiry, the outbound queue
//!     and inbound frames. Callers only touch channels.
//!
//! 2.  **Fixed-interval reconnect with a cap**: every non-normal close (and
//!     every failed handshake) schedules one retry after
//!     `reconnect_interval`. The attempt counter resets whenever a session
//!     actually opens.
//!
//! 3.  **Deliberate shutdown wins**: `disconnect()` cancels the driver,
//!     including a pending reconnect sleep, and no retry follows.
//!
//! 4.  **Session hooks**: [`SessionListener`]s run every time a session opens.
//!     This is how subscriptions are replayed after a reconnect.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::dispatcher::MessageRouter;
use crate::core::keepalive::KeepAlive;
use crate::core::transport::{build_url, redact, Connector, Transport, TransportError, WireEvent};
use crate::protocol::{is_auth_close, ControlFrame, ABNORMAL_CLOSURE, NORMAL_CLOSURE};

/// Connection lifecycle as observed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No socket and no retry scheduled, or waiting for a scheduled retry.
    #[default]
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Session open.
    Connected,
    /// Gave up: token rejected or reconnect attempts exhausted.
    Error,
}

/// Lifecycle notifications broadcast to interested parties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A session opened.
    Connected,
    /// A retry was scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// A session ended, or a handshake failed (reported as 1006).
    Closed {
        /// Close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// A transport level error was observed.
    Error {
        /// Human readable description.
        message: String,
    },
    /// The server refused the token. No further retries.
    AuthRejected {
        /// Close code or HTTP status carrying the rejection.
        code: u16,
    },
    /// The retry cap was reached. No further retries.
    ReconnectExhausted {
        /// Consecutive failed attempts.
        attempts: u32,
    },
}

/// Tunables for [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// `ws://` or `wss://` endpoint, without the token.
    pub base_url: String,
    /// Fixed wait between a close and the next attempt.
    pub reconnect_interval: Duration,
    /// Retries allowed after a close before giving up.
    pub max_reconnect_attempts: u32,
    /// Ping period while connected.
    pub keepalive_interval: Duration,
    /// Reconnect when nothing has been received for this long. Off when `None`.
    pub pong_timeout: Option<Duration>,
    /// Stop retrying on close codes 4001/4003 and handshake statuses 401/403.
    pub fail_fast_on_auth: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8000/api/v1/ws/notifications".to_string(),
            reconnect_interval: Duration::from_millis(3000),
            max_reconnect_attempts: 5,
            keepalive_interval: Duration::from_secs(30),
            pong_timeout: None,
            fail_fast_on_auth: true,
        }
    }
}

/// Cloneable sending side of the connection.
///
/// Frames are only accepted while the state is `Connected`; anything sent
/// otherwise is logged and dropped.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        state: watch::Receiver<ConnectionState>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self { state, outbound }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// True while a session is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Queues a control frame. Returns false when it was dropped.
    pub fn send(&self, frame: &ControlFrame) -> bool {
        if !self.is_connected() {
            log::debug!("ConnectionHandle: not connected, dropping {} frame", frame.kind());
            return false;
        }
        match frame.to_text() {
            Ok(text) => self.outbound.send(text).is_ok(),
            Err(e) => {
                log::warn!("ConnectionHandle: failed to encode {} frame: {}", frame.kind(), e);
                false
            }
        }
    }
}

/// Hook run each time a session opens.
pub trait SessionListener: Send + Sync {
    /// Called after the state turned `Connected`, before any inbound frame of
    /// the new session is processed.
    fn on_open(&self, handle: &ConnectionHandle);
}

struct Shared<C: Connector> {
    connector: C,
    settings: ConnectionSettings,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    router: Arc<MessageRouter>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    outbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    handle: ConnectionHandle,
}

impl<C: Connector> Shared<C> {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            log::debug!("ConnectionManager: {:?} -> {:?}", previous, state);
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn give_up(&self, event: ConnectionEvent) {
        self.set_state(ConnectionState::Error);
        self.emit(event);
    }
}

struct Driver {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// # Connection Manager
///
/// See the module docs. Must be created and used inside a tokio runtime.
pub struct ConnectionManager<C: Connector> {
    shared: Arc<Shared<C>>,
    driver: Mutex<Option<Driver>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates an idle manager. Inbound text frames go to `router`.
    pub fn new(connector: C, settings: ConnectionSettings, router: Arc<MessageRouter>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                connector,
                settings,
                state_tx,
                events,
                router,
                listeners: RwLock::new(Vec::new()),
                outbound_rx: tokio::sync::Mutex::new(outbound_rx),
                handle: ConnectionHandle::new(state_rx, outbound_tx),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Sending handle, usable from anywhere.
    pub fn handle(&self) -> ConnectionHandle {
        self.shared.handle.clone()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// State change stream.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Lifecycle event stream.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Router fed by this connection.
    pub fn router(&self) -> Arc<MessageRouter> {
        Arc::clone(&self.shared.router)
    }

    /// Settings in effect.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.shared.settings
    }

    /// Registers a hook that runs on every session open.
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Starts connecting with `token`.
    ///
    /// No-op while a previous `connect` is still running (connecting,
    /// connected or waiting to retry). The state is `Connecting` when this
    /// returns `Ok`.
    pub fn connect(&self, token: &str) -> Result<(), TransportError> {
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if driver.as_ref().is_some_and(|d| !d.join.is_finished()) {
            log::debug!("ConnectionManager: connect ignored, already {:?}", self.state());
            return Ok(());
        }

        let url = match build_url(&self.shared.settings.base_url, token) {
            Ok(url) => url,
            Err(e) => {
                log::error!("ConnectionManager: {}", e);
                self.shared.give_up(ConnectionEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        self.shared.set_state(ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        let join = tokio::spawn(run_driver(Arc::clone(&self.shared), url, cancel.clone()));
        *driver = Some(Driver { cancel, join });
        Ok(())
    }

    /// Closes the session with a normal closure and cancels any pending
    /// reconnect. Resolves once the driver has stopped.
    pub async fn disconnect(&self) {
        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(driver) = driver {
            driver.cancel.cancel();
            if let Err(e) = driver.join.await {
                log::warn!("ConnectionManager: driver task ended abnormally: {}", e);
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
        log::info!("ConnectionManager: disconnected");
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.lock().unwrap_or_else(PoisonError::into_inner).take() {
            driver.cancel.cancel();
        }
    }
}

enum SessionEnd {
    Cancelled,
    Closed { code: u16, reason: String },
}

async fn run_driver<C: Connector>(shared: Arc<Shared<C>>, url: Url, cancel: CancellationToken) {
    let settings = shared.settings.clone();
    let shown = redact(&url);
    let mut attempts: u32 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);
        log::info!("ConnectionManager: connecting to {}", shown);

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = shared.connector.connect(&url) => result,
        };

        let (code, reason) = match connected {
            Ok(transport) => {
                attempts = 0;
                match run_session(&shared, transport, &cancel).await {
                    SessionEnd::Cancelled => return,
                    SessionEnd::Closed { code, reason } => (code, reason),
                }
            }
            Err(TransportError::Rejected { status }) if settings.fail_fast_on_auth && matches!(status, 401 | 403) => {
                log::error!("ConnectionManager: handshake rejected with {}, not retrying", status);
                shared.give_up(ConnectionEvent::AuthRejected { code: status });
                return;
            }
            Err(e) => {
                log::warn!("ConnectionManager: {}", e);
                shared.emit(ConnectionEvent::Error {
                    message: e.to_string(),
                });
                (ABNORMAL_CLOSURE, e.to_string())
            }
        };

        log::info!("ConnectionManager: closed with code {} ({})", code, reason);
        shared.emit(ConnectionEvent::Closed {
            code,
            reason: reason.clone(),
        });

        if code == NORMAL_CLOSURE {
            shared.set_state(ConnectionState::Disconnected);
            return;
        }
        if settings.fail_fast_on_auth && is_auth_close(code) {
            log::error!("ConnectionManager: server rejected credentials (code {}), not retrying", code);
            shared.give_up(ConnectionEvent::AuthRejected { code });
            return;
        }
        if attempts >= settings.max_reconnect_attempts {
            log::error!("ConnectionManager: giving up after {} reconnect attempts", attempts);
            shared.give_up(ConnectionEvent::ReconnectExhausted { attempts });
            return;
        }

        attempts += 1;
        shared.set_state(ConnectionState::Disconnected);
        log::info!(
            "ConnectionManager: reconnect attempt {}/{} in {:?}",
            attempts,
            settings.max_reconnect_attempts,
            settings.reconnect_interval
        );
        shared.emit(ConnectionEvent::Reconnecting {
            attempt: attempts,
            delay: settings.reconnect_interval,
        });

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(settings.reconnect_interval) => {}
        }
    }
}

async fn run_session<C: Connector>(
    shared: &Shared<C>,
    mut transport: C::Transport,
    cancel: &CancellationToken,
) -> SessionEnd {
    let mut outbound = shared.outbound_rx.lock().await;
    let mut stale = 0usize;
    while outbound.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        log::debug!("ConnectionManager: discarded {} frames from a previous session", stale);
    }

    let session = cancel.child_token();
    let keepalive = KeepAlive::start(
        shared.handle.clone(),
        shared.settings.keepalive_interval,
        shared.settings.pong_timeout,
        session.clone(),
    );

    shared.set_state(ConnectionState::Connected);
    shared.emit(ConnectionEvent::Connected);
    log::info!("ConnectionManager: connected");

    let listeners = shared
        .listeners
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for listener in &listeners {
        listener.on_open(&shared.handle);
    }

    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = transport.close().await {
                    log::debug!("ConnectionManager: close on disconnect failed: {}", e);
                }
                shared.emit(ConnectionEvent::Closed {
                    code: NORMAL_CLOSURE,
                    reason: "client disconnect".to_string(),
                });
                break SessionEnd::Cancelled;
            }
            _ = keepalive.expired() => {
                if let Err(e) = transport.close().await {
                    log::debug!("ConnectionManager: close after pong timeout failed: {}", e);
                }
                break SessionEnd::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: "pong timeout".to_string(),
                };
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = transport.send_text(text).await {
                    log::warn!("ConnectionManager: {}", e);
                    break SessionEnd::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: e.to_string(),
                    };
                }
            }
            inbound = transport.recv() => match inbound {
                Some(Ok(WireEvent::Text(text))) => {
                    keepalive.touch();
                    shared.router.on_frame(&text);
                }
                Some(Ok(WireEvent::Heartbeat)) => keepalive.touch(),
                Some(Ok(WireEvent::Closed { code, reason })) => break SessionEnd::Closed { code, reason },
                Some(Err(e)) => {
                    log::warn!("ConnectionManager: {}", e);
                    break SessionEnd::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: e.to_string(),
                    };
                }
                None => {
                    break SessionEnd::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".to_string(),
                    }
                }
            }
        }
    };

    session.cancel();
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_drops_frames_unless_connected() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(state_rx, tx);
        let frame = ControlFrame::SubscribeCourse {
            course_id: "c".to_string(),
        };

        assert!(!handle.send(&frame));
        assert!(rx.try_recv().is_err());

        state_tx.send_replace(ConnectionState::Connected);
        assert!(handle.send(&frame));
        assert_eq!(rx.try_recv().unwrap(), r#"{"type":"subscribe_course","course_id":"c"}"#);
    }

    #[test]
    fn default_settings() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.reconnect_interval, Duration::from_secs(3));
        assert_eq!(settings.max_reconnect_attempts, 5);
        assert_eq!(settings.keepalive_interval, Duration::from_secs(30));
        assert!(settings.pong_timeout.is_none());
        assert!(settings.fail_fast_on_auth);
    }
}
