//! Timer abstraction for the playback scheduler.
//!
//! The scheduler never touches wall-clock APIs directly. Production code uses
//! [`TokioTimer`]; tests drive a [`ManualTimer`] and advance simulated time explicitly.

use crate::error::{LipSyncError, LipSyncResult};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Deferred work handed to a [`Timer`].
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Identifies one scheduled task on the timer that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Schedule-after-delay plus cancel, on a millisecond clock.
pub trait Timer: Send + Sync {
    /// Current time on this timer's clock, in milliseconds.
    fn now_ms(&self) -> u64;

    /// Run `task` once, `delay_ms` from now.
    fn schedule(&self, delay_ms: u64, task: TimerTask) -> TimerId;

    /// Drop a pending task. No-op if it already ran or was cancelled.
    fn cancel(&self, id: TimerId);
}

/// Timer backed by `tokio::time::sleep` on a runtime handle.
pub struct TokioTimer {
    origin: tokio::time::Instant,
    runtime: Handle,
    next_id: AtomicU64,
    pending: Arc<DashMap<u64, AbortHandle>>,
}

impl TokioTimer {
    /// Bind to the current Tokio runtime. Fails outside a runtime.
    pub fn new() -> LipSyncResult<Self> {
        let runtime = Handle::try_current().map_err(|e| LipSyncError::Timer(e.to_string()))?;
        Ok(Self::with_handle(runtime))
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            runtime,
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Tasks armed and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Timer for TokioTimer {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn schedule(&self, delay_ms: u64, task: TimerTask) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            pending.remove(&id);
            task();
        });
        self.pending.insert(id, join.abort_handle());
        if join.is_finished() {
            self.pending.remove(&id);
        }
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) {
        if let Some((_, handle)) = self.pending.remove(&id.0) {
            handle.abort();
        }
    }
}

struct ManualEntry {
    id: u64,
    due_ms: u64,
    task: TimerTask,
}

#[derive(Default)]
struct ManualState {
    now_ms: u64,
    next_id: u64,
    queue: Vec<ManualEntry>,
}

/// Simulated clock. Nothing fires until [`ManualTimer::advance`] is called.
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `ms`, running due tasks in due-time order.
    /// Tasks run without the internal lock held, so they may schedule or cancel.
    /// Returns how many tasks fired.
    pub fn advance(&self, ms: u64) -> usize {
        let target = self.now_ms().saturating_add(ms);
        self.advance_to(target)
    }

    /// Move time forward to an absolute instant.
    pub fn advance_to(&self, target_ms: u64) -> usize {
        let mut fired = 0;
        loop {
            let task = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                let next = state
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.due_ms <= target_ms)
                    .min_by_key(|(_, e)| (e.due_ms, e.id))
                    .map(|(idx, _)| idx);
                match next {
                    Some(idx) => {
                        let entry = state.queue.remove(idx);
                        state.now_ms = state.now_ms.max(entry.due_ms);
                        entry.task
                    }
                    None => {
                        state.now_ms = state.now_ms.max(target_ms);
                        break;
                    }
                }
            };
            task();
            fired += 1;
        }
        fired
    }

    /// Tasks armed and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .len()
    }
}

impl Timer for ManualTimer {
    fn now_ms(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now_ms
    }

    fn schedule(&self, delay_ms: u64, task: TimerTask) -> TimerId {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let id = state.next_id;
        let due_ms = state.now_ms.saturating_add(delay_ms);
        state.queue.push(ManualEntry { id, due_ms, task });
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.queue.retain(|e| e.id != id.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_timer_fires_in_due_order() {
        let timer = ManualTimer::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (delay, tag) in [(300u64, "c"), (100, "a"), (200, "b")] {
            let log = Arc::clone(&log);
            timer.schedule(delay, Box::new(move || log.lock().unwrap().push(tag)));
        }
        assert_eq!(timer.advance(150), 1);
        assert_eq!(timer.now_ms(), 150);
        assert_eq!(timer.advance(1000), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn manual_timer_cancel_drops_task() {
        let timer = ManualTimer::new();
        let id = timer.schedule(10, Box::new(|| panic!("cancelled task ran")));
        timer.cancel(id);
        assert_eq!(timer.pending(), 0);
        assert_eq!(timer.advance(100), 0);
    }

    #[test]
    fn tokio_timer_requires_runtime() {
        assert!(TokioTimer::new().is_err());
    }

    #[tokio::test]
    async fn tokio_timer_fires_and_cancels() {
        let timer = TokioTimer::new().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let tx2 = tx.clone();
        timer.schedule(5, Box::new(move || {
            let _ = tx.send("kept");
        }));
        let drop_me = timer.schedule(5, Box::new(move || {
            let _ = tx2.send("cancelled");
        }));
        timer.cancel(drop_me);
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(first, Some("kept"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }
}
