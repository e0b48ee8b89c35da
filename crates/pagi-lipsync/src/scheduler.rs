//! **Playback scheduler**: fire viseme changes in step with the audio clock.
//!
//! Each event's delay is `event.start_ms - (now - reference_start_ms)`. Late events fire
//! immediately instead of being skipped. The terminal neutral reset is always armed.
//!
//! A [`PlaybackHandle`] moves `Scheduled → Completed` when the reset fires naturally, or
//! `Scheduled → Cancelled` on [`PlaybackHandle::cancel`]. Both are absorbing: once either
//! is reached no further callback fires for that handle.
//!
//! Callbacks run while the handle's state lock is held, which is what guarantees that
//! nothing fires after `cancel()` returns. A callback must not call back into its own handle.

use crate::clock::{Timer, TimerId};
use crate::timing::Timeline;
use crate::viseme::{VisemeCode, NEUTRAL};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Consumer of viseme changes (the animation layer). Passed in explicitly per playback.
pub type OnVisemeChange = Arc<dyn Fn(VisemeCode) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Scheduled,
    Completed,
    Cancelled,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Scheduled => "scheduled",
            PlaybackState::Completed => "completed",
            PlaybackState::Cancelled => "cancelled",
        }
    }
}

struct HandleInner {
    id: u64,
    state: Mutex<PlaybackState>,
    timers: Mutex<Vec<TimerId>>,
    on_change: OnVisemeChange,
    timer: Arc<dyn Timer>,
}

impl HandleInner {
    /// Deliver one scheduled change unless the handle already reached a terminal state.
    fn fire(&self, code: VisemeCode, terminal: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != PlaybackState::Scheduled {
            return;
        }
        if terminal {
            *state = PlaybackState::Completed;
            debug!(playback = self.id, "scheduler: timeline completed");
        }
        (self.on_change)(code);
    }
}

/// Cancellation token for one scheduled timeline. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PlaybackHandle {
    inner: Arc<HandleInner>,
}

impl PlaybackHandle {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> PlaybackState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Still waiting on callbacks.
    pub fn is_active(&self) -> bool {
        self.state() == PlaybackState::Scheduled
    }

    /// Invalidate every pending callback and reset the mouth to neutral.
    ///
    /// Returns `true` if this call cancelled the playback. A second call, or a call after
    /// natural completion, does nothing and returns `false`.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != PlaybackState::Scheduled {
            return false;
        }
        *state = PlaybackState::Cancelled;

        let timers = std::mem::take(
            &mut *self
                .inner
                .timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for id in &timers {
            self.inner.timer.cancel(*id);
        }
        (self.inner.on_change)(NEUTRAL);
        info!(playback = self.inner.id, disarmed = timers.len(), "scheduler: playback cancelled");
        true
    }
}

impl fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Arms timers for timelines. Every call to [`schedule`](Self::schedule) gets a fresh handle.
pub struct PlaybackScheduler {
    timer: Arc<dyn Timer>,
    next_id: AtomicU64,
}

impl PlaybackScheduler {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self {
            timer,
            next_id: AtomicU64::new(1),
        }
    }

    /// Current time on the scheduler's clock; use as `reference_start_ms` when audio starts now.
    pub fn now_ms(&self) -> u64 {
        self.timer.now_ms()
    }

    /// Schedule `timeline` against audio that started (or will start) at `reference_start_ms`.
    pub fn schedule(
        &self,
        timeline: &Timeline,
        on_change: OnVisemeChange,
        reference_start_ms: u64,
    ) -> PlaybackHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(HandleInner {
            id,
            state: Mutex::new(PlaybackState::Scheduled),
            timers: Mutex::new(Vec::with_capacity(timeline.len() + 1)),
            on_change,
            timer: Arc::clone(&self.timer),
        });

        let now = self.timer.now_ms() as i128;
        let elapsed = now - reference_start_ms as i128;
        let last = timeline.len();
        let mut immediate = 0usize;

        for (idx, event) in timeline.iter_with_reset().enumerate() {
            let terminal = idx == last;
            let delay = event.start_ms as i128 - elapsed;
            if delay <= 0 {
                immediate += 1;
                inner.fire(event.code, terminal);
                continue;
            }

            let task_inner = Arc::clone(&inner);
            let code = event.code;
            let timer_id = self.timer.schedule(
                delay as u64,
                Box::new(move || task_inner.fire(code, terminal)),
            );
            inner
                .timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(timer_id);
        }

        debug!(
            playback = id,
            events = timeline.len(),
            immediate,
            reset_at_ms = timeline.reset_at_ms,
            late_by_ms = elapsed.max(0) as u64,
            "scheduler: timeline armed"
        );

        PlaybackHandle { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimer;
    use crate::timing::{TimelineOrigin, VisemeEvent};

    fn recorder() -> (OnVisemeChange, Arc<Mutex<Vec<VisemeCode>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (Arc::new(move |code| sink.lock().unwrap().push(code)), log)
    }

    fn timeline() -> Timeline {
        Timeline {
            events: vec![
                VisemeEvent {
                    code: 10,
                    start_ms: 0,
                    end_ms: 200,
                    source_text: "ha".into(),
                },
                VisemeEvent {
                    code: 1,
                    start_ms: 200,
                    end_ms: 400,
                    source_text: "m".into(),
                },
            ],
            reset_at_ms: 550,
            origin: TimelineOrigin::Alignment,
        }
    }

    #[test]
    fn fires_in_order_and_completes() {
        let timer = Arc::new(ManualTimer::new());
        let scheduler = PlaybackScheduler::new(timer.clone());
        let (cb, log) = recorder();

        let handle = scheduler.schedule(&timeline(), cb, scheduler.now_ms());
        // First event is due now and fires synchronously.
        assert_eq!(*log.lock().unwrap(), vec![10]);

        timer.advance(200);
        assert_eq!(*log.lock().unwrap(), vec![10, 1]);
        assert!(handle.is_active());

        timer.advance(400);
        assert_eq!(*log.lock().unwrap(), vec![10, 1, 0]);
        assert_eq!(handle.state(), PlaybackState::Completed);
        assert!(!handle.cancel());
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn late_start_fires_past_events_immediately() {
        let timer = Arc::new(ManualTimer::new());
        timer.advance(1000);
        let scheduler = PlaybackScheduler::new(timer.clone());
        let (cb, log) = recorder();

        // Audio began 250ms ago: both spoken events are already due.
        let handle = scheduler.schedule(&timeline(), cb, 750);
        assert_eq!(*log.lock().unwrap(), vec![10, 1]);
        timer.advance(300);
        assert_eq!(*log.lock().unwrap(), vec![10, 1, 0]);
        assert_eq!(handle.state(), PlaybackState::Completed);
    }

    #[test]
    fn future_reference_delays_everything() {
        let timer = Arc::new(ManualTimer::new());
        let scheduler = PlaybackScheduler::new(timer.clone());
        let (cb, log) = recorder();
        let _handle = scheduler.schedule(&timeline(), cb, 100);
        assert!(log.lock().unwrap().is_empty());
        timer.advance(100);
        assert_eq!(*log.lock().unwrap(), vec![10]);
    }

    #[test]
    fn empty_timeline_still_resets() {
        let timer = Arc::new(ManualTimer::new());
        let scheduler = PlaybackScheduler::new(timer.clone());
        let (cb, log) = recorder();
        let handle = scheduler.schedule(&Timeline::empty(150, TimelineOrigin::Placeholder), cb, 0);
        timer.advance(150);
        assert_eq!(*log.lock().unwrap(), vec![0]);
        assert_eq!(handle.state(), PlaybackState::Completed);
    }

    #[test]
    fn cancel_is_idempotent_and_silences_pending() {
        let timer = Arc::new(ManualTimer::new());
        let scheduler = PlaybackScheduler::new(timer.clone());
        let (cb, log) = recorder();
        let handle = scheduler.schedule(&timeline(), cb, 0);
        timer.advance(50);

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert_eq!(*log.lock().unwrap(), vec![10, 0]);
        assert_eq!(timer.pending(), 0);

        timer.advance(10_000);
        assert_eq!(*log.lock().unwrap(), vec![10, 0]);
        assert_eq!(handle.state(), PlaybackState::Cancelled);
    }

    #[test]
    fn each_schedule_gets_a_new_handle() {
        let timer = Arc::new(ManualTimer::new());
        let scheduler = PlaybackScheduler::new(timer);
        let (cb, _log) = recorder();
        let a = scheduler.schedule(&timeline(), cb.clone(), 0);
        let b = scheduler.schedule(&timeline(), cb, 0);
        assert_ne!(a.id(), b.id());
    }
}
