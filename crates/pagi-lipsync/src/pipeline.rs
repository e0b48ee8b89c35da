//! Timeline construction: classifier → grouper → smoother, with the fallback
//! estimator as a pluggable timing source.

use crate::config::LipSyncConfig;
use crate::error::{LipSyncError, LipSyncResult};
use crate::fallback::{placeholder_timeline, TimingEstimator};
use crate::grouper::group_characters;
use crate::smoother::{events_from_groups, smooth};
use crate::timing::{AlignmentTimestamps, CharacterTiming, Timeline, TimelineOrigin, VisemeEvent};
use crate::viseme::NEUTRAL;
use tracing::{debug, warn};

/// Builds finalized timelines from any timing source.
#[derive(Debug, Clone, Default)]
pub struct TimelineBuilder {
    config: LipSyncConfig,
}

impl TimelineBuilder {
    pub fn new(config: LipSyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LipSyncConfig {
        &self.config
    }

    /// Group, classify and smooth an ordered character sequence.
    pub fn from_character_timings(
        &self,
        timings: &[CharacterTiming],
        origin: TimelineOrigin,
    ) -> Timeline {
        let groups = group_characters(timings, self.config.max_group_size);
        let raw = events_from_groups(&groups, self.config.profile, self.config.tie_break);
        let raw = insert_pauses(raw, self.config.pause_threshold_ms);
        let timeline = smooth(raw, self.config.smoother(), origin);
        debug!(
            origin = origin.as_str(),
            characters = timings.len(),
            groups = groups.len(),
            visemes = timeline.len(),
            "pipeline: timeline ready"
        );
        timeline
    }

    /// Timeline from service alignment. Errors when nothing usable survives
    /// normalization, so the caller can switch to the fallback estimator.
    pub fn from_alignment(&self, alignment: &AlignmentTimestamps) -> LipSyncResult<Timeline> {
        if alignment.is_empty() {
            return Err(LipSyncError::AlignmentUnavailable(
                "alignment payload is empty".to_string(),
            ));
        }
        let timings = alignment.to_character_timings();
        if timings.is_empty() {
            return Err(LipSyncError::MalformedTiming(format!(
                "all {} alignment entries were discarded",
                alignment.entries.len()
            )));
        }
        Ok(self.from_character_timings(&timings, TimelineOrigin::Alignment))
    }

    /// Timeline from an estimator. Falls back to the placeholder when the estimator
    /// produces nothing.
    pub fn from_estimate(
        &self,
        estimator: &dyn TimingEstimator,
        text: &str,
        audio_duration_ms: Option<u64>,
    ) -> Timeline {
        let timings = estimator.estimate(text, audio_duration_ms);
        if timings.is_empty() {
            warn!(
                origin = estimator.origin().as_str(),
                has_duration = audio_duration_ms.is_some(),
                "pipeline: no timing source; using placeholder timeline"
            );
            return self.placeholder(audio_duration_ms);
        }
        self.from_character_timings(&timings, estimator.origin())
    }

    /// Placeholder scaled to `nominal_ms`, or the configured default.
    pub fn placeholder(&self, nominal_ms: Option<u64>) -> Timeline {
        let nominal = nominal_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(self.config.placeholder_duration_ms);
        placeholder_timeline(nominal, self.config.profile, self.config.smoother())
    }
}

/// Close the mouth over long gaps between spoken events.
fn insert_pauses(raw: Vec<VisemeEvent>, threshold_ms: u64) -> Vec<VisemeEvent> {
    if threshold_ms == 0 || raw.len() < 2 {
        return raw;
    }
    let mut out = Vec::with_capacity(raw.len());
    let mut prev_end: Option<u64> = None;
    for event in raw {
        if let Some(end) = prev_end {
            if event.start_ms >= end.saturating_add(threshold_ms) {
                out.push(VisemeEvent {
                    code: NEUTRAL,
                    start_ms: end,
                    end_ms: event.start_ms,
                    source_text: " ".to_string(),
                });
            }
        }
        prev_end = Some(event.end_ms);
        out.push(event);
    }
    out
}
