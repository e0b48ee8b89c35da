//! **Viseme smoother**: turn raw per-group events into a stable timeline.
//!
//! Single left-to-right pass:
//! 1. An event shorter than the minimum dwell merges into the previous kept event
//!    (the first event instead extends into the next one).
//! 2. An event with the same code as the previous kept event merges into it.
//! 3. The terminal neutral reset is placed `reset_buffer_ms` after the last event.
//!
//! Without these rules adjacent near-duplicate groups make the mouth flap.

use crate::timing::{PhonemeGroup, Timeline, TimelineOrigin, VisemeEvent};
use crate::viseme::{VisemeCode, VisemeProfile, NEUTRAL};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How to pick a group's code when several codes share the top vote count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Prefer the first non-neutral code encountered among the tied codes.
    #[default]
    FirstNonNeutral,
    /// Prefer whichever tied code appears first, neutral included.
    FirstEncountered,
}

/// Majority vote over a group's codes.
pub fn dominant_code(codes: &[VisemeCode], tie_break: TieBreak) -> VisemeCode {
    // (code, votes) in first-seen order
    let mut votes: Vec<(VisemeCode, usize)> = Vec::new();
    for &code in codes {
        match votes.iter_mut().find(|(c, _)| *c == code) {
            Some(entry) => entry.1 += 1,
            None => votes.push((code, 1)),
        }
    }

    let Some(top) = votes.iter().map(|(_, n)| *n).max() else {
        return NEUTRAL;
    };
    let mut tied = votes.iter().filter(|(_, n)| *n == top).map(|(c, _)| *c);

    match tie_break {
        TieBreak::FirstNonNeutral => tied.find(|c| *c != NEUTRAL).unwrap_or(NEUTRAL),
        TieBreak::FirstEncountered => tied.next().unwrap_or(NEUTRAL),
    }
}

/// One raw event per group, coded by the group's dominant viseme.
pub fn events_from_groups(
    groups: &[PhonemeGroup],
    profile: VisemeProfile,
    tie_break: TieBreak,
) -> Vec<VisemeEvent> {
    groups
        .iter()
        .map(|g| {
            let codes: Vec<VisemeCode> = g.symbols.iter().map(|s| profile.classify(s)).collect();
            VisemeEvent {
                code: dominant_code(&codes, tie_break),
                start_ms: g.start_ms,
                end_ms: g.end_ms,
                source_text: g.text(),
            }
        })
        .collect()
}

/// Smoothing parameters. Both values are configuration, not constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmootherConfig {
    pub min_dwell_ms: u64,
    pub reset_buffer_ms: u64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            min_dwell_ms: 100,
            reset_buffer_ms: 150,
        }
    }
}

/// Apply the dwell and dedupe rules and attach the terminal reset.
pub fn smooth(raw: Vec<VisemeEvent>, config: SmootherConfig, origin: TimelineOrigin) -> Timeline {
    let min_dwell = config.min_dwell_ms;
    let raw_len = raw.len();
    let mut kept: Vec<VisemeEvent> = Vec::with_capacity(raw_len);
    // A too-short leading event waiting to be folded into its successor.
    let mut pending: Option<VisemeEvent> = None;

    for mut event in raw {
        if let Some(lead) = pending.take() {
            event.start_ms = lead.start_ms;
            event.source_text = lead.source_text + &event.source_text;
        }

        match kept.last_mut() {
            None => {
                if event.duration_ms() < min_dwell {
                    pending = Some(event);
                } else {
                    kept.push(event);
                }
            }
            Some(prev) => {
                if event.duration_ms() < min_dwell || event.code == prev.code {
                    prev.end_ms = prev.end_ms.max(event.end_ms);
                    prev.source_text.push_str(&event.source_text);
                } else {
                    kept.push(event);
                }
            }
        }
    }

    // Whole utterance shorter than the dwell: hold the one shape for the minimum.
    if let Some(mut lead) = pending {
        if lead.duration_ms() < min_dwell {
            lead.end_ms = lead.start_ms.saturating_add(min_dwell);
        }
        kept.push(lead);
    }

    let reset_at_ms = kept
        .last()
        .map(|e| e.end_ms)
        .unwrap_or(0)
        .saturating_add(config.reset_buffer_ms);

    debug!(
        raw = raw_len,
        kept = kept.len(),
        reset_at_ms,
        "smoother: timeline built"
    );

    Timeline {
        events: kept,
        reset_at_ms,
        origin,
    }
}
