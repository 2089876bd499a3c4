//! # KeepAlive
//!
//! Per-session ping timer. Started when a session opens and stopped when it
//! ends, so a timer can never outlive the connection it was started for.
//!
//! When a pong timeout is configured, the timer also watches inbound activity
//! and flags the session as expired after a silent period.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::connection_manager::ConnectionHandle;
use crate::protocol::ControlFrame;

struct Inner {
    last_seen: Mutex<Instant>,
    pings_sent: AtomicU64,
    expired: CancellationToken,
}

/// Handle to a running keepalive timer. Dropping it stops the timer.
pub struct KeepAlive {
    inner: Arc<Inner>,
    stop: CancellationToken,
}

impl KeepAlive {
    /// Spawns the timer.
    ///
    /// The first ping goes out one full `interval` after start. `stop` should
    /// be a child of the session's token; cancelling it ends the timer.
    pub fn start(
        handle: ConnectionHandle,
        interval: Duration,
        pong_timeout: Option<Duration>,
        stop: CancellationToken,
    ) -> Self {
        let inner = Arc::new(Inner {
            last_seen: Mutex::new(Instant::now()),
            pings_sent: AtomicU64::new(0),
            expired: CancellationToken::new(),
        });

        let task_inner = Arc::clone(&inner);
        let task_stop = stop.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(timeout) = pong_timeout {
                            let silent_for = task_inner
                                .last_seen
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .elapsed();
                            if silent_for >= timeout {
                                log::warn!(
                                    "KeepAlive: no inbound traffic for {:?} (timeout {:?}), expiring session",
                                    silent_for, timeout
                                );
                                task_inner.expired.cancel();
                                break;
                            }
                        }
                        if handle.send(&ControlFrame::ping_now()) {
                            task_inner.pings_sent.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
            log::trace!("KeepAlive: timer stopped");
        });

        Self { inner, stop }
    }

    /// Records inbound activity.
    pub fn touch(&self) {
        *self
            .inner
            .last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Resolves once the pong timeout fires. Pends forever when no timeout is
    /// configured.
    pub async fn expired(&self) {
        self.inner.expired.cancelled().await
    }

    /// Pings queued so far.
    pub fn pings_sent(&self) -> u64 {
        self.inner.pings_sent.load(Ordering::Relaxed)
    }

    /// Stops the timer.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection_manager::ConnectionState;
    use tokio::sync::{mpsc, watch};

    fn connected_handle() -> (
        ConnectionHandle,
        watch::Sender<ConnectionState>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(state_rx, tx), state_tx, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn pings_every_interval_starting_after_one_interval() {
        let (handle, _state, mut frames) = connected_handle();
        let keepalive = KeepAlive::start(handle, Duration::from_secs(30), None, CancellationToken::new());

        time::sleep(Duration::from_secs(29)).await;
        assert!(frames.try_recv().is_err());

        time::sleep(Duration::from_secs(2)).await;
        assert!(frames.try_recv().unwrap().contains(r#""type":"ping""#));

        time::sleep(Duration::from_secs(30)).await;
        assert!(frames.try_recv().is_ok());
        assert_eq!(keepalive.pings_sent(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_ends_the_timer() {
        let (handle, _state, mut frames) = connected_handle();
        let keepalive = KeepAlive::start(handle, Duration::from_secs(30), None, CancellationToken::new());
        keepalive.stop();

        time::sleep(Duration::from_secs(90)).await;
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_expires_after_pong_timeout() {
        let (handle, _state, _frames) = connected_handle();
        let keepalive = KeepAlive::start(
            handle,
            Duration::from_secs(30),
            Some(Duration::from_secs(45)),
            CancellationToken::new(),
        );

        // 30s tick: 30s of silence, still alive. 60s tick: expired.
        let started = Instant::now();
        keepalive.expired().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_traffic_keeps_session_alive() {
        let (handle, _state, _frames) = connected_handle();
        let keepalive = KeepAlive::start(
            handle,
            Duration::from_secs(30),
            Some(Duration::from_secs(45)),
            CancellationToken::new(),
        );

        for _ in 0..6 {
            time::sleep(Duration::from_secs(20)).await;
            keepalive.touch();
        }
        let expired = time::timeout(Duration::from_secs(1), keepalive.expired()).await;
        assert!(expired.is_err());
    }
}
