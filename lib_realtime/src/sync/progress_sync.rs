//! # Progress Sync
//!
//! Coalesces high-frequency playback samples for one (course, content) pair
//! into occasional upserts.
//!
//! ## Rules:
//!
//! 1.  **Debounce**: every sample restarts a single quiet-period timer,
//!     measured from when the sample was taken. A write is issued only once
//!     the timer runs out, carrying the values of the latest sample.
//!
//! 2.  **Sticky completion**: a computed (unrounded) percentage of 95 or more
//!     sets `completed`, and nothing clears it again. Syncs that share a
//!     [`CompletionLedger`] also share the flag, so reopening finished
//!     content keeps writing `completed: true`.
//!
//! 3.  **Best effort**: a failed write is logged and dropped. The next sample
//!     supersedes it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::progress_api::{ProgressRecord, ProgressWrite, ProgressWriter};

/// Percentage at which content counts as completed.
pub const COMPLETION_THRESHOLD: f64 = 95.0;
/// Default quiet period before a write.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Content a [`ProgressSync`] writes for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgressTarget {
    /// Course id.
    pub course_id: String,
    /// Content id.
    pub content_id: String,
}

impl ProgressTarget {
    /// Convenience constructor.
    pub fn new(course_id: impl Into<String>, content_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            content_id: content_id.into(),
        }
    }
}

/// Targets that reached completion. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct CompletionLedger {
    done: Arc<Mutex<HashSet<ProgressTarget>>>,
}

impl CompletionLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `target` was completed by any sync sharing this ledger.
    pub fn is_completed(&self, target: &ProgressTarget) -> bool {
        self.done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(target)
    }

    /// Records completion. Returns false if it was already recorded.
    pub fn mark_completed(&self, target: &ProgressTarget) -> bool {
        self.done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.clone())
    }
}

/// `position / duration * 100` before rounding. Zero when the duration is
/// zero, negative, or not finite.
fn raw_percentage(position_secs: f64, duration_secs: f64) -> f64 {
    if !duration_secs.is_finite() || duration_secs <= 0.0 || !position_secs.is_finite() {
        return 0.0;
    }
    position_secs / duration_secs * 100.0
}

/// Wire percentage: the computed ratio rounded and clamped to 0-100.
pub fn progress_percentage(position_secs: f64, duration_secs: f64) -> u8 {
    raw_percentage(position_secs, duration_secs).round().clamp(0.0, 100.0) as u8
}

#[derive(Default)]
struct SyncState {
    last_sent: Option<ProgressWrite>,
    last_saved: Option<ProgressRecord>,
}

struct Sample {
    taken_at: Instant,
    write: ProgressWrite,
}

/// # Progress Sync
///
/// Owns a background worker; must be created inside a tokio runtime.
/// Dropping the instance flushes a pending write, if any, and stops the
/// worker.
pub struct ProgressSync {
    target: ProgressTarget,
    completed: AtomicBool,
    ledger: CompletionLedger,
    samples: mpsc::UnboundedSender<Sample>,
    state: Arc<Mutex<SyncState>>,
    worker: JoinHandle<()>,
}

impl ProgressSync {
    /// Starts a sync for `target` with the given quiet period and a private
    /// completion ledger.
    pub fn new(target: ProgressTarget, writer: Arc<dyn ProgressWriter>, debounce: Duration) -> Self {
        Self::start(target, writer, debounce, SyncState::default(), false)
    }

    /// Starts a sync seeded with a record fetched from the server, so that a
    /// completed record stays completed and an identical first write is
    /// skipped. A record for a different target is ignored.
    pub fn with_initial(
        target: ProgressTarget,
        writer: Arc<dyn ProgressWriter>,
        debounce: Duration,
        initial: ProgressRecord,
    ) -> Self {
        if initial.course_id != target.course_id || initial.content_id != target.content_id {
            log::warn!(
                "ProgressSync: ignoring initial record for {}/{} (target is {}/{})",
                initial.course_id,
                initial.content_id,
                target.course_id,
                target.content_id
            );
            return Self::new(target, writer, debounce);
        }
        let completed = initial.completed;
        let state = SyncState {
            last_sent: Some(initial.as_write()),
            last_saved: Some(initial),
        };
        Self::start(target, writer, debounce, state, completed)
    }

    /// Shares completion with every other sync on `ledger`: completion already
    /// recorded there applies to this instance, and this instance's completion
    /// is recorded there.
    pub fn with_ledger(mut self, ledger: CompletionLedger) -> Self {
        if self.completed.load(Ordering::Relaxed) {
            ledger.mark_completed(&self.target);
        } else if ledger.is_completed(&self.target) {
            self.completed.store(true, Ordering::Relaxed);
        }
        self.ledger = ledger;
        self
    }

    fn start(
        target: ProgressTarget,
        writer: Arc<dyn ProgressWriter>,
        debounce: Duration,
        state: SyncState,
        completed: bool,
    ) -> Self {
        let (samples, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(state));
        let worker = tokio::spawn(run_worker(writer, debounce, rx, Arc::clone(&state)));
        let ledger = CompletionLedger::new();
        if completed {
            ledger.mark_completed(&target);
        }
        Self {
            target,
            completed: AtomicBool::new(completed),
            ledger,
            samples,
            state,
            worker,
        }
    }

    /// Feeds one playback sample.
    pub fn on_sample(&self, position_secs: f64, duration_secs: f64) {
        if raw_percentage(position_secs, duration_secs) >= COMPLETION_THRESHOLD
            && !self.completed.swap(true, Ordering::Relaxed)
        {
            self.ledger.mark_completed(&self.target);
            log::info!(
                "ProgressSync: {}/{} completed",
                self.target.course_id,
                self.target.content_id
            );
        } else if !self.completed.load(Ordering::Relaxed) && self.ledger.is_completed(&self.target) {
            self.completed.store(true, Ordering::Relaxed);
        }

        let last_position = if position_secs.is_finite() && position_secs > 0.0 {
            position_secs.floor() as u64
        } else {
            0
        };
        let write = ProgressWrite {
            course_id: self.target.course_id.clone(),
            content_id: self.target.content_id.clone(),
            progress_percentage: progress_percentage(position_secs, duration_secs),
            last_position,
            completed: self.completed.load(Ordering::Relaxed),
        };
        let sample = Sample {
            taken_at: Instant::now(),
            write,
        };
        if self.samples.send(sample).is_err() {
            log::warn!("ProgressSync: worker for {} is gone, sample dropped", self.target.content_id);
        }
    }

    /// Target of this instance.
    pub fn target(&self) -> &ProgressTarget {
        &self.target
    }

    /// True once completion has been reached.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Relaxed)
    }

    /// Last record the server acknowledged.
    pub fn last_saved(&self) -> Option<ProgressRecord> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_saved
            .clone()
    }

    /// Flushes any pending write and waits for the worker to finish.
    pub async fn finish(self) {
        let Self { samples, worker, .. } = self;
        drop(samples);
        if let Err(e) = worker.await {
            log::warn!("ProgressSync: worker ended abnormally: {}", e);
        }
    }
}

async fn run_worker(
    writer: Arc<dyn ProgressWriter>,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<Sample>,
    state: Arc<Mutex<SyncState>>,
) {
    while let Some(mut pending) = rx.recv().await {
        // Samples queued behind a slow write are drained before their
        // (possibly already elapsed) deadline is checked.
        loop {
            tokio::select! {
                biased;
                next = rx.recv() => match next {
                    Some(sample) => pending = sample,
                    None => break,
                },
                _ = time::sleep_until(pending.taken_at + debounce) => break,
            }
        }
        flush(writer.as_ref(), pending.write, &state).await;
    }
}

async fn flush(writer: &dyn ProgressWriter, write: ProgressWrite, state: &Mutex<SyncState>) {
    let unchanged = state
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .last_sent
        .as_ref()
        .is_some_and(|last| *last == write);
    if unchanged {
        log::trace!("ProgressSync: {} unchanged, skipping write", write.content_id);
        return;
    }

    log::debug!(
        "ProgressSync: saving {}/{} at {}% (completed: {})",
        write.course_id,
        write.content_id,
        write.progress_percentage,
        write.completed
    );
    match writer.save(&write).await {
        Ok(record) => {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.last_sent = Some(write);
            state.last_saved = Some(record);
        }
        Err(e) => log::warn!("ProgressSync: write for {} failed: {}", write.content_id, e),
    }
}
