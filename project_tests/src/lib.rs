//! # Test Harness
//!
//! Scripted stand-ins for the socket layer, so connection lifecycle tests can
//! run on tokio's paused clock without any network.
//!
//! - [`ScriptedConnector`] decides per attempt whether a handshake succeeds,
//!   is refused, or is rejected with an HTTP status.
//! - Every accepted handshake yields a [`FakeSession`]: the server side of
//!   the socket, which can push frames, close with a code, and read what the
//!   client sent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lib_realtime::core::{Connector, Transport, TransportError, WireEvent};
use lib_realtime::{ConnectionEvent, ConnectionSettings};
use tokio::sync::{broadcast, mpsc};
use url::Url;

/// Outcome of one scripted handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Handshake succeeds.
    Accept,
    /// TCP level failure.
    Refuse,
    /// Upgrade answered with this HTTP status.
    Reject(u16),
}

/// Connector driven by a queue of [`Plan`]s, falling back to a default.
pub struct ScriptedConnector {
    plans: Arc<Mutex<VecDeque<Plan>>>,
    fallback: Plan,
    attempts: Arc<AtomicU32>,
    urls: Arc<Mutex<Vec<Url>>>,
    sessions: mpsc::UnboundedSender<FakeSession>,
}

/// Test-side view of a [`ScriptedConnector`].
pub struct Script {
    plans: Arc<Mutex<VecDeque<Plan>>>,
    attempts: Arc<AtomicU32>,
    urls: Arc<Mutex<Vec<Url>>>,
    sessions: mpsc::UnboundedReceiver<FakeSession>,
}

impl ScriptedConnector {
    /// Connector whose every attempt follows `fallback` unless a plan is queued.
    pub fn new(fallback: Plan) -> (Self, Script) {
        let plans = Arc::new(Mutex::new(VecDeque::new()));
        let attempts = Arc::new(AtomicU32::new(0));
        let urls = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                plans: plans.clone(),
                fallback,
                attempts: attempts.clone(),
                urls: urls.clone(),
                sessions: tx,
            },
            Script {
                plans,
                attempts,
                urls,
                sessions: rx,
            },
        )
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Transport = FakeTransport;

    async fn connect(&self, url: &Url) -> Result<FakeTransport, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.clone());
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(self.fallback);
        match plan {
            Plan::Accept => {
                let (to_client, inbound) = mpsc::unbounded_channel();
                let (outbound, from_client) = mpsc::unbounded_channel();
                let closed_by_client = Arc::new(AtomicBool::new(false));
                let _ = self.sessions.send(FakeSession {
                    to_client,
                    from_client,
                    closed_by_client: closed_by_client.clone(),
                });
                Ok(FakeTransport {
                    inbound,
                    outbound,
                    closed_by_client,
                })
            }
            Plan::Refuse => Err(TransportError::ConnectFailed("connection refused".to_string())),
            Plan::Reject(status) => Err(TransportError::Rejected { status }),
        }
    }
}

impl Script {
    /// Handshakes attempted so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Queues the outcome of the next attempt.
    pub fn push(&self, plan: Plan) {
        self.plans.lock().unwrap().push_back(plan);
    }

    /// URLs the client connected to, in order.
    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().unwrap().clone()
    }

    /// Waits for the next accepted handshake.
    pub async fn next_session(&mut self) -> FakeSession {
        tokio::time::timeout(Duration::from_secs(600), self.sessions.recv())
            .await
            .expect("no session opened in time")
            .expect("connector dropped")
    }
}

/// Client half of a fake socket.
pub struct FakeTransport {
    inbound: mpsc::UnboundedReceiver<WireEvent>,
    outbound: mpsc::UnboundedSender<String>,
    closed_by_client: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::SendFailed("server side gone".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<WireEvent, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed_by_client.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Server half of a fake socket. Dropping it ends the stream (seen as 1006).
pub struct FakeSession {
    to_client: mpsc::UnboundedSender<WireEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed_by_client: Arc<AtomicBool>,
}

impl FakeSession {
    /// Pushes one text frame to the client.
    pub fn push_text(&self, text: &str) {
        let _ = self.to_client.send(WireEvent::Text(text.to_string()));
    }

    /// Closes from the server side with `code`.
    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(WireEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Waits for the next frame the client sends.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Frames the client sends within `window`.
    pub async fn frames_within(&mut self, window: Duration) -> Vec<String> {
        let mut frames = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, self.from_client.recv()).await {
            frames.push(frame);
        }
        frames
    }

    /// True once the client started a normal-closure shutdown.
    pub fn closed_by_client(&self) -> bool {
        self.closed_by_client.load(Ordering::SeqCst)
    }
}

/// Settings with the reference timings and a fake endpoint.
pub fn test_settings(max_reconnect_attempts: u32) -> ConnectionSettings {
    ConnectionSettings {
        base_url: "ws://fake.local/api/v1/ws/notifications".to_string(),
        max_reconnect_attempts,
        ..ConnectionSettings::default()
    }
}

/// Receives events until one matches, returning every event seen on the
/// way (the match included). Panics after `within`.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    within: Duration,
    mut matches: F,
) -> Vec<ConnectionEvent>
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => {
                let done = matches(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
            Ok(Err(e)) => panic!("event stream failed: {e}; seen so far: {seen:?}"),
            Err(_) => panic!("expected event did not arrive; seen: {seen:?}"),
        }
    }
}

/// `{"type":"subscribe_course","course_id":<id>}` as sent on the wire.
pub fn subscribe_frame(course_id: &str) -> String {
    format!(r#"{{"type":"subscribe_course","course_id":"{course_id}"}}"#)
}
