//! # PAGI Lip Sync - Alignment-Driven Viseme Playback
//!
//! Turns speech-synthesis timing into a smoothed track of mouth shapes (visemes) and
//! plays it against the audio clock, one utterance at a time. Lip motion is cosmetic:
//! every failure degrades to an estimated, placeholder or neutral mouth, never to an
//! error in the conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Turn Controller                           │
//! │  ┌───────────────┐   ┌──────────────┐   ┌──────────────────┐    │
//! │  │ Alignment Src │ → │   Grouper    │ → │ Classifier/Vote  │    │
//! │  │ (HTTP, cache) │   │ (CV groups)  │   │  (viseme codes)  │    │
//! │  └───────────────┘   └──────────────┘   └──────────────────┘    │
//! │          ↓ fail             ↑                     ↓              │
//! │  ┌───────────────┐          │            ┌──────────────────┐    │
//! │  │   Fallback    │──────────┘            │     Smoother     │    │
//! │  │  Estimator    │                       │ (dwell, dedupe)  │    │
//! │  └───────────────┘                       └──────────────────┘    │
//! │                                                   ↓              │
//! │  ┌───────────────┐    onVisemeChange     ┌──────────────────┐    │
//! │  │   Animation   │←──────────────────────│    Scheduler     │    │
//! │  │   Renderer    │   (cancel → neutral)  │  (Timer, Handle) │    │
//! │  └───────────────┘                       └──────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod alignment;
pub mod clock;
pub mod config;
pub mod error;
pub mod fallback;
pub mod grouper;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod smoother;
pub mod timing;
pub mod turn;
pub mod viseme;

pub use alignment::{
    normalize_text, parse_alignment_response, AlignmentCache, AlignmentSource, CacheStats,
    ElevenLabsAlignment, PlaceholderAlignment,
};
pub use clock::{ManualTimer, Timer, TimerId, TokioTimer};
pub use config::{FallbackKind, LipSyncConfig};
pub use error::{LipSyncError, LipSyncResult};
pub use fallback::{
    estimator_for, placeholder_timeline, word_slices, FixedRateWalk, TimingEstimator,
    WordDurationSplit, WordSlice,
};
pub use grouper::group_characters;
pub use metrics::{LipSyncMetrics, MetricsSnapshot};
pub use pipeline::TimelineBuilder;
pub use scheduler::{OnVisemeChange, PlaybackHandle, PlaybackScheduler, PlaybackState};
pub use smoother::{dominant_code, events_from_groups, smooth, SmootherConfig, TieBreak};
pub use timing::{
    AlignmentTimestamps, CharacterTiming, PhonemeGroup, TimeUnit, Timeline, TimelineOrigin,
    TimestampEntry, VisemeEvent,
};
pub use turn::{TurnController, TurnOutcome, Utterance};
pub use viseme::{classify, tokenize, Viseme, VisemeCode, VisemeProfile, NEUTRAL};
