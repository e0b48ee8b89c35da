//! Turn-level lip-sync control
//!
//! Keeps at most one timeline playing across a live conversation. A new agent utterance
//! cancels whatever is playing (barge-in) and replaces it. A redelivery of the text that
//! is still being fetched or playing is skipped. A timeline whose fetch finishes after a
//! newer turn or an interrupt is dropped. Missing or broken alignment never blocks a turn:
//! the controller logs it and falls back to an estimated timeline.

use crate::alignment::{normalize_text, AlignmentCache, AlignmentSource};
use crate::clock::Timer;
use crate::config::LipSyncConfig;
use crate::error::LipSyncError;
use crate::fallback::{estimator_for, TimingEstimator};
use crate::metrics::LipSyncMetrics;
use crate::pipeline::TimelineBuilder;
use crate::scheduler::{OnVisemeChange, PlaybackHandle, PlaybackScheduler};
use crate::timing::{AlignmentTimestamps, Timeline, TimelineOrigin};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One agent utterance as delivered by the speech pipeline.
#[derive(Debug, Clone, Default)]
pub struct Utterance {
    pub text: String,
    /// Per-character timing delivered alongside the audio, if any.
    pub alignment: Option<AlignmentTimestamps>,
    /// Audio length; drives the word-split fallback.
    pub audio_duration_ms: Option<u64>,
    /// Voice for alignment lookups. Defaults to the controller's voice.
    pub voice_id: Option<String>,
    /// When audio playback started, on the controller's timer clock. Defaults to "now".
    pub audio_start_ms: Option<u64>,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_alignment(mut self, alignment: AlignmentTimestamps) -> Self {
        self.alignment = Some(alignment);
        self
    }

    pub fn with_audio_duration_ms(mut self, ms: u64) -> Self {
        self.audio_duration_ms = Some(ms);
        self
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = Some(voice_id.into());
        self
    }

    pub fn starting_at(mut self, audio_start_ms: u64) -> Self {
        self.audio_start_ms = Some(audio_start_ms);
        self
    }
}

/// What [`TurnController::speak`] did with an utterance.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// A new timeline is playing.
    Scheduled {
        handle: PlaybackHandle,
        origin: TimelineOrigin,
        visemes: usize,
    },
    /// Same text as the turn still being built or playing; nothing scheduled.
    Duplicate,
    /// Nothing to say. Previous playback was cancelled.
    Silent,
    /// A newer turn, an interrupt or a reset arrived while timing was being fetched.
    /// The stale timeline was dropped.
    Superseded,
}

impl TurnOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, TurnOutcome::Scheduled { .. })
    }

    pub fn handle(&self) -> Option<&PlaybackHandle> {
        match self {
            TurnOutcome::Scheduled { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

/// The controller's single playback slot.
#[derive(Default)]
struct TurnSlot {
    /// Bumped by every new turn, interrupt and reset. A build that finishes under an
    /// older generation is discarded.
    generation: u64,
    /// Normalized text of the newest turn while it is being built or played.
    text: Option<String>,
    handle: Option<PlaybackHandle>,
}

impl TurnSlot {
    /// Timing for the newest turn is still being fetched or built.
    fn is_pending(&self) -> bool {
        self.text.is_some() && self.handle.is_none()
    }

    fn is_playing(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_active()).unwrap_or(false)
    }

    fn cancel(&self) -> bool {
        self.handle.as_ref().map(|h| h.cancel()).unwrap_or(false)
    }
}

/// Owns the current playback handle for one avatar.
///
/// `on_change` is invoked from timer callbacks and from `cancel`; it must not call back
/// into this controller.
pub struct TurnController {
    scheduler: PlaybackScheduler,
    builder: TimelineBuilder,
    estimator: Arc<dyn TimingEstimator>,
    alignment: Option<Arc<dyn AlignmentSource>>,
    cache: AlignmentCache,
    metrics: Arc<LipSyncMetrics>,
    on_change: OnVisemeChange,
    voice_id: String,
    slot: Mutex<TurnSlot>,
}

impl TurnController {
    /// Create a controller with the configured fallback strategy and no alignment source.
    pub fn new(config: LipSyncConfig, timer: Arc<dyn Timer>, on_change: OnVisemeChange) -> Self {
        let estimator = estimator_for(config.fallback, &config);
        let cache = AlignmentCache::new(config.cache_capacity);
        Self {
            scheduler: PlaybackScheduler::new(timer),
            builder: TimelineBuilder::new(config),
            estimator,
            alignment: None,
            cache,
            metrics: Arc::new(LipSyncMetrics::new()),
            on_change,
            voice_id: "default".to_string(),
            slot: Mutex::new(TurnSlot::default()),
        }
    }

    /// Fetch alignment from `source` for utterances that arrive without it.
    pub fn with_alignment_source(mut self, source: Arc<dyn AlignmentSource>) -> Self {
        self.alignment = Some(source);
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TimingEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<LipSyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<LipSyncMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn cache(&self) -> &AlignmentCache {
        &self.cache
    }

    /// Start lip sync for a new agent utterance.
    pub async fn speak(&self, utterance: Utterance) -> TurnOutcome {
        let text = normalize_text(&utterance.text);

        let generation = {
            let mut slot = self.lock_slot();
            let same_text = slot.text.as_deref() == Some(text.as_str());
            if same_text && (slot.is_pending() || slot.is_playing()) {
                self.metrics.record_duplicate();
                debug!(pending = slot.is_pending(), "👄 Duplicate utterance skipped");
                return TurnOutcome::Duplicate;
            }
            // Barge-in: stop the old mouth track before any await.
            slot.cancel();
            slot.handle = None;
            slot.generation += 1;
            if text.is_empty() && utterance.alignment.is_none() {
                slot.text = None;
                debug!("👄 Empty utterance; staying neutral");
                return TurnOutcome::Silent;
            }
            slot.text = Some(text.clone());
            slot.generation
        };

        let timeline = self.build_timeline(&utterance, &text).await;
        let origin = timeline.origin;
        let visemes = timeline.len();

        let mut slot = self.lock_slot();
        if slot.generation != generation {
            debug!(
                generation,
                current = slot.generation,
                "👄 Turn superseded while fetching timing; dropping timeline"
            );
            return TurnOutcome::Superseded;
        }
        let reference = utterance
            .audio_start_ms
            .unwrap_or_else(|| self.scheduler.now_ms());
        let handle = self
            .scheduler
            .schedule(&timeline, Arc::clone(&self.on_change), reference);
        slot.handle = Some(handle.clone());
        drop(slot);

        self.metrics.record_scheduled(origin, visemes);
        info!(
            playback = handle.id(),
            origin = origin.as_str(),
            visemes,
            reset_at_ms = timeline.reset_at_ms,
            "👄 Lip sync scheduled"
        );

        TurnOutcome::Scheduled {
            handle,
            origin,
            visemes,
        }
    }

    /// Barge-in without a new turn: stop the mouth and return to neutral. A turn whose
    /// timing is still being fetched will not start.
    /// Returns `true` if something was playing or about to play.
    pub fn interrupt(&self) -> bool {
        let mut slot = self.lock_slot();
        let pending = slot.is_pending();
        let cancelled = slot.cancel();
        slot.generation += 1;
        slot.text = None;
        drop(slot);

        let interrupted = cancelled || pending;
        if interrupted {
            self.metrics.record_interruption();
            info!(pending, "🛑 Lip sync interrupted");
        }
        interrupted
    }

    /// Cancel playback and forget the last utterance (e.g. after a reconnect).
    pub fn reset(&self) {
        let mut slot = self.lock_slot();
        slot.cancel();
        slot.generation += 1;
        slot.text = None;
        slot.handle = None;
        debug!("👄 Turn state reset");
    }

    pub fn is_playing(&self) -> bool {
        self.lock_slot().is_playing()
    }

    pub fn current_handle(&self) -> Option<PlaybackHandle> {
        self.lock_slot().handle.clone()
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, TurnSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn build_timeline(&self, utterance: &Utterance, text: &str) -> Timeline {
        if let Some(alignment) = &utterance.alignment {
            match self.builder.from_alignment(alignment) {
                Ok(timeline) => return timeline,
                Err(e) => self.note_alignment_error(&e, "delivered"),
            }
        } else if let Some(source) = &self.alignment {
            let voice = utterance.voice_id.as_deref().unwrap_or(&self.voice_id);
            let started = Instant::now();
            let result = self
                .cache
                .get_or_try_build(text, voice, || async {
                    let alignment = source.fetch_alignment(text, voice).await?;
                    self.metrics.record_alignment_latency(started.elapsed());
                    self.builder.from_alignment(&alignment)
                })
                .await;
            match result {
                Ok(timeline) => return timeline,
                Err(e) => self.note_alignment_error(&e, voice),
            }
        }

        self.builder
            .from_estimate(self.estimator.as_ref(), text, utterance.audio_duration_ms)
    }

    /// Alignment failures are counted; anything else (a misconfigured source) is only
    /// logged. Both paths continue with the estimator.
    fn note_alignment_error(&self, error: &LipSyncError, source: &str) {
        if error.is_recoverable_by_fallback() {
            self.metrics.record_alignment_failure();
            warn!(error = %error, source, "⚠️ Alignment unavailable; using fallback");
        } else {
            warn!(error = %error, source, "⚠️ Alignment source misconfigured; using fallback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimer;
    use crate::config::FallbackKind;
    use crate::error::{LipSyncError, LipSyncResult};
    use crate::timing::{TimeUnit, TimestampEntry};
    use crate::viseme::{VisemeCode, NEUTRAL};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn recorder() -> (OnVisemeChange, Arc<Mutex<Vec<VisemeCode>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (Arc::new(move |code| sink.lock().unwrap().push(code)), log)
    }

    fn controller() -> (TurnController, Arc<ManualTimer>, Arc<Mutex<Vec<VisemeCode>>>) {
        let timer = Arc::new(ManualTimer::new());
        let (cb, log) = recorder();
        let ctl = TurnController::new(LipSyncConfig::default(), timer.clone(), cb);
        (ctl, timer, log)
    }

    fn hi_alignment() -> AlignmentTimestamps {
        AlignmentTimestamps::new(
            vec![
                TimestampEntry { ch: "H".into(), start: 0.0, end: 100.0 },
                TimestampEntry { ch: "i".into(), start: 100.0, end: 200.0 },
            ],
            TimeUnit::Milliseconds,
        )
    }

    struct FailingSource(AtomicUsize);

    #[async_trait]
    impl AlignmentSource for FailingSource {
        async fn fetch_alignment(&self, _: &str, _: &str) -> LipSyncResult<AlignmentTimestamps> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(LipSyncError::AlignmentHttp("connection refused".into()))
        }
    }

    struct FixedSource(AtomicUsize);

    #[async_trait]
    impl AlignmentSource for FixedSource {
        async fn fetch_alignment(&self, _: &str, _: &str) -> LipSyncResult<AlignmentTimestamps> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(hi_alignment())
        }
    }

    struct MisconfiguredSource;

    #[async_trait]
    impl AlignmentSource for MisconfiguredSource {
        async fn fetch_alignment(&self, _: &str, _: &str) -> LipSyncResult<AlignmentTimestamps> {
            Err(LipSyncError::Config("ELEVENLABS_API_KEY not set".into()))
        }
    }

    /// Holds every fetch until the test releases it.
    struct GatedSource {
        gate: Notify,
        calls: AtomicUsize,
    }

    impl GatedSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Notify::new(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AlignmentSource for GatedSource {
        async fn fetch_alignment(&self, _: &str, _: &str) -> LipSyncResult<AlignmentTimestamps> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(hi_alignment())
        }
    }

    #[tokio::test]
    async fn redelivery_while_playing_is_skipped() {
        let (ctl, _timer, _log) = controller();
        let first = ctl
            .speak(Utterance::new("Hello there").with_audio_duration_ms(1000))
            .await;
        assert!(first.is_scheduled());
        let again = ctl
            .speak(Utterance::new("Hello  there ").with_audio_duration_ms(1000))
            .await;
        assert!(matches!(again, TurnOutcome::Duplicate));
        assert!(first.handle().unwrap().is_active());
        assert_eq!(ctl.metrics().snapshot().utterances_scheduled, 1);
    }

    #[tokio::test]
    async fn repeat_after_completion_plays_again() {
        let (ctl, timer, _log) = controller();
        ctl.speak(Utterance::new("Hi").with_alignment(hi_alignment())).await;
        timer.advance(10_000);
        assert!(!ctl.is_playing());
        let again = ctl.speak(Utterance::new("Hi").with_alignment(hi_alignment())).await;
        assert!(again.is_scheduled());
    }

    #[tokio::test]
    async fn new_utterance_cancels_previous() {
        let (ctl, timer, log) = controller();
        let first = ctl
            .speak(Utterance::new("one two three").with_audio_duration_ms(3000))
            .await;
        timer.advance(500);
        let second = ctl
            .speak(Utterance::new("four five").with_audio_duration_ms(2000))
            .await;
        let first = first.handle().unwrap();
        let second = second.handle().unwrap();
        assert_ne!(first.id(), second.id());
        assert!(!first.is_active());
        assert!(second.is_active());
        assert!(log.lock().unwrap().contains(&NEUTRAL));
    }

    #[tokio::test]
    async fn fetch_failure_falls_back() {
        let (ctl, _timer, _log) = controller();
        let source = Arc::new(FailingSource(AtomicUsize::new(0)));
        let ctl = ctl.with_alignment_source(source.clone());
        let outcome = ctl
            .speak(Utterance::new("hello world").with_audio_duration_ms(800))
            .await;
        match outcome {
            TurnOutcome::Scheduled { origin, .. } => assert_eq!(origin, TimelineOrigin::WordSplit),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
        let s = ctl.metrics().snapshot();
        assert_eq!(s.alignment_failures, 1);
        assert_eq!(s.fallback_uses, 1);
    }

    #[tokio::test]
    async fn fetched_alignment_is_cached() {
        let (ctl, timer, _log) = controller();
        let source = Arc::new(FixedSource(AtomicUsize::new(0)));
        let ctl = ctl.with_alignment_source(source.clone());
        let first = ctl.speak(Utterance::new("Hi")).await;
        match first {
            TurnOutcome::Scheduled { origin, .. } => assert_eq!(origin, TimelineOrigin::Alignment),
            other => panic!("unexpected outcome {:?}", other),
        }
        timer.advance(10_000);
        ctl.speak(Utterance::new("Hi")).await;
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn no_duration_word_split_uses_placeholder() {
        let (ctl, _timer, _log) = controller();
        let outcome = ctl.speak(Utterance::new("hello")).await;
        match outcome {
            TurnOutcome::Scheduled { origin, .. } => assert_eq!(origin, TimelineOrigin::Placeholder),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn fixed_rate_needs_no_duration() {
        let timer = Arc::new(ManualTimer::new());
        let (cb, _log) = recorder();
        let config = LipSyncConfig {
            fallback: FallbackKind::FixedRate,
            ..Default::default()
        };
        let ctl = TurnController::new(config, timer, cb);
        let outcome = ctl.speak(Utterance::new("hello")).await;
        match outcome {
            TurnOutcome::Scheduled { origin, .. } => assert_eq!(origin, TimelineOrigin::FixedRate),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn interrupt_and_reset() {
        let (ctl, _timer, log) = controller();
        assert!(!ctl.interrupt());
        ctl.speak(Utterance::new("Hi").with_alignment(hi_alignment())).await;
        assert!(ctl.is_playing());
        assert!(ctl.interrupt());
        assert!(!ctl.interrupt());
        assert!(!ctl.is_playing());
        assert_eq!(log.lock().unwrap().iter().filter(|c| **c == NEUTRAL).count(), 1);

        ctl.reset();
        assert!(ctl.current_handle().is_none());
        assert_eq!(ctl.metrics().snapshot().interruptions, 1);
    }

    #[tokio::test]
    async fn empty_text_is_silent() {
        let (ctl, _timer, log) = controller();
        let outcome = ctl.speak(Utterance::new("   ")).await;
        assert!(matches!(outcome, TurnOutcome::Silent));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_fetch_does_not_override_newer_turn() {
        let (ctl, _timer, _log) = controller();
        let source = GatedSource::new();
        let ctl = ctl.with_alignment_source(source.clone());

        let (older, newer) = tokio::join!(ctl.speak(Utterance::new("Hi")), async {
            let newer = ctl
                .speak(Utterance::new("Bye now").with_alignment(hi_alignment()))
                .await;
            source.gate.notify_one();
            newer
        });

        assert!(matches!(older, TurnOutcome::Superseded));
        let newer = newer.handle().unwrap();
        assert!(newer.is_active());
        assert_eq!(ctl.current_handle().unwrap().id(), newer.id());
        assert_eq!(ctl.metrics().snapshot().utterances_scheduled, 1);
    }

    #[tokio::test]
    async fn interrupt_during_fetch_stops_the_turn() {
        let (ctl, _timer, log) = controller();
        let source = GatedSource::new();
        let ctl = ctl.with_alignment_source(source.clone());

        let (outcome, interrupted) = tokio::join!(ctl.speak(Utterance::new("Hi")), async {
            let interrupted = ctl.interrupt();
            source.gate.notify_one();
            interrupted
        });

        assert!(interrupted);
        assert!(matches!(outcome, TurnOutcome::Superseded));
        assert!(!ctl.is_playing());
        assert!(ctl.current_handle().is_none());
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(ctl.metrics().snapshot().interruptions, 1);
    }

    #[tokio::test]
    async fn redelivery_during_fetch_is_skipped() {
        let (ctl, _timer, _log) = controller();
        let source = GatedSource::new();
        let ctl = ctl.with_alignment_source(source.clone());

        let (first, again) = tokio::join!(ctl.speak(Utterance::new("Hi")), async {
            let again = ctl.speak(Utterance::new(" Hi ")).await;
            source.gate.notify_one();
            again
        });

        assert!(first.is_scheduled());
        assert!(matches!(again, TurnOutcome::Duplicate));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let s = ctl.metrics().snapshot();
        assert_eq!(s.utterances_scheduled, 1);
        assert_eq!(s.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn misconfigured_source_falls_back_without_counting_failure() {
        let (ctl, _timer, _log) = controller();
        let ctl = ctl.with_alignment_source(Arc::new(MisconfiguredSource));
        let outcome = ctl
            .speak(Utterance::new("hello world").with_audio_duration_ms(800))
            .await;
        match outcome {
            TurnOutcome::Scheduled { origin, .. } => assert_eq!(origin, TimelineOrigin::WordSplit),
            other => panic!("unexpected outcome {:?}", other),
        }
        let s = ctl.metrics().snapshot();
        assert_eq!(s.alignment_failures, 0);
        assert_eq!(s.fallback_uses, 1);
    }
}
