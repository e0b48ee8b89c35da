//! **Fallback estimator**: synthesize character timing when the speech service gives none.
//!
//! Both strategies emit ordinary [`CharacterTiming`]s so the grouper and smoother run
//! unchanged and the scheduler cannot tell which path produced a timeline. When neither
//! strategy has anything to work with, [`placeholder_timeline`] opens and closes the
//! mouth over a nominal duration. Missing timing never raises an error.

use crate::config::{FallbackKind, LipSyncConfig};
use crate::smoother::{smooth, SmootherConfig};
use crate::timing::{
    split_point, CharacterTiming, Timeline, TimelineOrigin, VisemeEvent, MAX_TIMESTAMP_MS,
};
use crate::viseme::{Viseme, VisemeProfile};
use std::sync::Arc;

/// Strategy for estimating per-character timing from plain text.
pub trait TimingEstimator: Send + Sync {
    /// Origin recorded on timelines built from this estimate.
    fn origin(&self) -> TimelineOrigin;

    /// Per-character timing for `text`. Empty when the strategy cannot estimate
    /// (e.g. no words, or it needs an audio duration that is not known).
    fn estimate(&self, text: &str, audio_duration_ms: Option<u64>) -> Vec<CharacterTiming>;
}

/// One word's share of the utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordSlice {
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Split `total_ms` evenly across the whitespace-separated words of `text`.
/// Integer boundaries are `total * i / n`, so slices tile the duration exactly.
pub fn word_slices(text: &str, total_ms: u64) -> Vec<WordSlice> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let n = words.len() as u64;
    words
        .into_iter()
        .enumerate()
        .map(|(i, word)| {
            let i = i as u64;
            WordSlice {
                word: word.to_string(),
                start_ms: split_point(0, total_ms, i, n),
                end_ms: split_point(0, total_ms, i + 1, n),
            }
        })
        .collect()
}

/// Equal slice per word over the known audio duration; letters share their word's slice.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordDurationSplit;

impl TimingEstimator for WordDurationSplit {
    fn origin(&self) -> TimelineOrigin {
        TimelineOrigin::WordSplit
    }

    fn estimate(&self, text: &str, audio_duration_ms: Option<u64>) -> Vec<CharacterTiming> {
        let total = match audio_duration_ms {
            Some(ms) if ms > 0 => ms.min(MAX_TIMESTAMP_MS),
            _ => return Vec::new(),
        };

        let mut out = Vec::new();
        for slice in word_slices(text, total) {
            let chars: Vec<char> = slice.word.chars().collect();
            let n = chars.len() as u64;
            let span = slice.end_ms - slice.start_ms;
            for (k, ch) in chars.into_iter().enumerate() {
                let k = k as u64;
                let start = split_point(slice.start_ms, span, k, n);
                let end = split_point(slice.start_ms, span, k + 1, n);
                out.push(CharacterTiming::new(ch, start, end - start).with_word(slice.word.as_str()));
            }
            out.push(CharacterTiming::new(' ', slice.end_ms, 0));
        }
        out
    }
}

/// Fixed duration per non-space character, placed by ordinal position.
/// For text-only playback where no audio duration exists.
#[derive(Debug, Clone, Copy)]
pub struct FixedRateWalk {
    pub char_ms: u64,
}

impl Default for FixedRateWalk {
    fn default() -> Self {
        Self { char_ms: 120 }
    }
}

impl TimingEstimator for FixedRateWalk {
    fn origin(&self) -> TimelineOrigin {
        TimelineOrigin::FixedRate
    }

    fn estimate(&self, text: &str, _audio_duration_ms: Option<u64>) -> Vec<CharacterTiming> {
        let mut out = Vec::with_capacity(text.len());
        let mut ordinal = 0u64;
        for ch in text.chars() {
            let at = ordinal.saturating_mul(self.char_ms);
            if ch.is_whitespace() {
                out.push(CharacterTiming::new(ch, at, 0));
            } else {
                out.push(CharacterTiming::new(ch, at, self.char_ms));
                ordinal += 1;
            }
        }
        out
    }
}

/// Build the configured estimator.
pub fn estimator_for(kind: FallbackKind, config: &LipSyncConfig) -> Arc<dyn TimingEstimator> {
    match kind {
        FallbackKind::WordSplit => Arc::new(WordDurationSplit),
        FallbackKind::FixedRate => Arc::new(FixedRateWalk {
            char_ms: config.fixed_rate_char_ms,
        }),
    }
}

/// Neutral → open → neutral over `nominal_ms`, for when no timing source exists at all.
pub fn placeholder_timeline(
    nominal_ms: u64,
    profile: VisemeProfile,
    smoother: SmootherConfig,
) -> Timeline {
    let talking = VisemeEvent {
        code: profile.code(Viseme::AA),
        start_ms: 0,
        end_ms: nominal_ms.max(smoother.min_dwell_ms),
        source_text: String::new(),
    };
    smooth(vec![talking], smoother, TimelineOrigin::Placeholder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_words_in_three_seconds_get_one_second_each() {
        let slices = word_slices("one two three", 3000);
        assert_eq!(slices.len(), 3);
        for (i, s) in slices.iter().enumerate() {
            assert_eq!(s.end_ms - s.start_ms, 1000);
            assert_eq!(s.start_ms, i as u64 * 1000);
        }
    }

    #[test]
    fn word_split_letters_stay_inside_their_slice() {
        let t = WordDurationSplit.estimate("hey you", Some(1000));
        let you: Vec<_> = t.iter().filter(|c| c.word.as_deref() == Some("you")).collect();
        assert_eq!(you.len(), 3);
        assert_eq!(you[0].start_ms, 500);
        assert_eq!(you[2].end_ms(), 1000);
    }

    #[test]
    fn absurd_durations_are_clamped_not_fatal() {
        let slices = word_slices("a b c", u64::MAX);
        assert_eq!(slices[2].end_ms, u64::MAX);
        let t = WordDurationSplit.estimate("hello there", Some(u64::MAX));
        assert!(t.iter().all(|c| c.end_ms() <= MAX_TIMESTAMP_MS));
        let t = FixedRateWalk { char_ms: u64::MAX }.estimate("abc", None);
        assert_eq!(t[2].start_ms, u64::MAX);
    }

    #[test]
    fn word_split_needs_a_duration() {
        assert!(WordDurationSplit.estimate("hello", None).is_empty());
        assert!(WordDurationSplit.estimate("hello", Some(0)).is_empty());
        assert!(WordDurationSplit.estimate("   ", Some(1000)).is_empty());
    }

    #[test]
    fn fixed_rate_counts_only_non_space_characters() {
        let t = FixedRateWalk { char_ms: 100 }.estimate("ab c", None);
        assert_eq!(t.len(), 4);
        assert_eq!(t[1].start_ms, 100);
        assert_eq!(t[2].duration_ms, 0);
        assert_eq!(t[3].start_ms, 200);
        assert_eq!(t[3].duration_ms, 100);
    }

    #[test]
    fn placeholder_talks_then_resets() {
        let t = placeholder_timeline(800, VisemeProfile::Oculus15, SmootherConfig::default());
        assert_eq!(t.origin, TimelineOrigin::Placeholder);
        assert_eq!(t.events.len(), 1);
        assert_ne!(t.events[0].code, crate::viseme::NEUTRAL);
        assert_eq!(t.events[0].end_ms, 800);
        assert!(t.reset_at_ms > 800);
    }
}
