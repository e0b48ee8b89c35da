//! Timing data model: per-character input, phoneme groups, viseme events and timelines.
//!
//! All times are whole milliseconds relative to the start of the utterance audio.
//! Service payloads in seconds are normalized here, at the boundary, by
//! [`AlignmentTimestamps::to_character_timings`].

use crate::viseme::{VisemeCode, NEUTRAL};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Longest utterance offset accepted from a timing source (24 hours).
pub const MAX_TIMESTAMP_MS: u64 = 24 * 60 * 60 * 1000;

/// Boundary `k` of `n` equal parts of `[start_ms, start_ms + span_ms]`. Never overflows.
pub(crate) fn split_point(start_ms: u64, span_ms: u64, k: u64, n: u64) -> u64 {
    if n == 0 {
        return start_ms;
    }
    let offset = span_ms as u128 * k as u128 / n as u128;
    start_ms.saturating_add(offset.min(u64::MAX as u128) as u64)
}

/// One input unit from the speech-synthesis collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterTiming {
    pub ch: char,
    pub start_ms: u64,
    pub duration_ms: u64,
    /// Word this character belongs to, when known. A change of word closes a group.
    #[serde(default)]
    pub word: Option<String>,
}

impl CharacterTiming {
    pub fn new(ch: char, start_ms: u64, duration_ms: u64) -> Self {
        Self {
            ch,
            start_ms,
            duration_ms,
            word: None,
        }
    }

    pub fn with_word(mut self, word: impl Into<String>) -> Self {
        self.word = Some(word.into());
        self
    }

    pub fn end_ms(&self) -> u64 {
        self.start_ms.saturating_add(self.duration_ms)
    }
}

/// A coarse, phoneme-like run of symbols. `end_ms > start_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonemeGroup {
    pub symbols: Vec<String>,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl PhonemeGroup {
    pub fn text(&self) -> String {
        self.symbols.concat()
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// One mouth shape held over `[start_ms, end_ms)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisemeEvent {
    pub code: VisemeCode,
    pub start_ms: u64,
    pub end_ms: u64,
    pub source_text: String,
}

impl VisemeEvent {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Which producer built a timeline. Downstream playback ignores it; metrics do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineOrigin {
    Alignment,
    WordSplit,
    FixedRate,
    Placeholder,
}

impl TimelineOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineOrigin::Alignment => "alignment",
            TimelineOrigin::WordSplit => "word_split",
            TimelineOrigin::FixedRate => "fixed_rate",
            TimelineOrigin::Placeholder => "placeholder",
        }
    }

    pub fn is_fallback(&self) -> bool {
        !matches!(self, TimelineOrigin::Alignment)
    }
}

/// Smoothed, ordered viseme events plus the terminal reset to neutral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Spoken events, strictly ordered, non-overlapping, no adjacent duplicate codes.
    pub events: Vec<VisemeEvent>,
    /// When the mouth returns to neutral: last event end + reset buffer.
    pub reset_at_ms: u64,
    pub origin: TimelineOrigin,
}

impl Timeline {
    /// A timeline with nothing to say still resets to neutral.
    pub fn empty(reset_buffer_ms: u64, origin: TimelineOrigin) -> Self {
        Self {
            events: Vec::new(),
            reset_at_ms: reset_buffer_ms,
            origin,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// The terminal neutral event (zero length, starts at `reset_at_ms`).
    pub fn terminal_event(&self) -> VisemeEvent {
        VisemeEvent {
            code: NEUTRAL,
            start_ms: self.reset_at_ms,
            end_ms: self.reset_at_ms,
            source_text: String::new(),
        }
    }

    /// Spoken events followed by the terminal reset.
    pub fn iter_with_reset(&self) -> impl Iterator<Item = VisemeEvent> + '_ {
        self.events
            .iter()
            .cloned()
            .chain(std::iter::once(self.terminal_event()))
    }

    pub fn duration_ms(&self) -> u64 {
        self.reset_at_ms
    }
}

/// Unit of the raw numbers in an alignment payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    #[default]
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    fn to_ms(self, value: f64) -> f64 {
        match self {
            TimeUnit::Seconds => value * 1000.0,
            TimeUnit::Milliseconds => value,
        }
    }
}

/// One raw `{char, start, end}` triple as delivered by the speech service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampEntry {
    pub ch: String,
    pub start: f64,
    pub end: f64,
}

/// Per-character alignment for one request text, in service units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentTimestamps {
    pub entries: Vec<TimestampEntry>,
    #[serde(default)]
    pub unit: TimeUnit,
}

impl AlignmentTimestamps {
    pub fn new(entries: Vec<TimestampEntry>, unit: TimeUnit) -> Self {
        Self { entries, unit }
    }

    /// Build from the parallel-array layout (`characters`, `*_start_times_seconds`, ...).
    /// Extra elements in the longer arrays are ignored.
    pub fn from_parallel(
        characters: &[String],
        starts: &[f64],
        ends: &[f64],
        unit: TimeUnit,
    ) -> Self {
        let n = characters.len().min(starts.len()).min(ends.len());
        if n < characters.len() || n < starts.len() || n < ends.len() {
            warn!(
                characters = characters.len(),
                starts = starts.len(),
                ends = ends.len(),
                "alignment arrays differ in length; truncating"
            );
        }
        let entries = (0..n)
            .map(|i| TimestampEntry {
                ch: characters[i].clone(),
                start: starts[i],
                end: ends[i],
            })
            .collect();
        Self { entries, unit }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Concatenated characters, i.e. the text that was aligned.
    pub fn text(&self) -> String {
        self.entries.iter().map(|e| e.ch.as_str()).collect()
    }

    /// Normalize to millisecond [`CharacterTiming`]s tagged with their word.
    ///
    /// Negative, non-finite, inverted, non-monotonic, and out-of-range (past
    /// [`MAX_TIMESTAMP_MS`]) entries are discarded with a warning; the rest of the
    /// utterance is kept. Multi-character entries are split evenly across their characters.
    pub fn to_character_timings(&self) -> Vec<CharacterTiming> {
        let mut out: Vec<CharacterTiming> = Vec::with_capacity(self.entries.len());
        let mut last_end = 0u64;
        let mut discarded = 0usize;

        for (idx, entry) in self.entries.iter().enumerate() {
            let start = self.unit.to_ms(entry.start);
            let end = self.unit.to_ms(entry.end);
            if !start.is_finite()
                || !end.is_finite()
                || start < 0.0
                || end < start
                || end > MAX_TIMESTAMP_MS as f64
            {
                warn!(index = idx, ch = %entry.ch, start, end, "discarding malformed timing entry");
                discarded += 1;
                continue;
            }
            let start_ms = start.round() as u64;
            let end_ms = end.round() as u64;
            if start_ms < last_end {
                warn!(index = idx, ch = %entry.ch, start_ms, last_end, "discarding non-monotonic timing entry");
                discarded += 1;
                continue;
            }

            let chars: Vec<char> = entry.ch.chars().collect();
            if chars.is_empty() {
                continue;
            }
            let span = end_ms - start_ms;
            let n = chars.len() as u64;
            for (k, ch) in chars.into_iter().enumerate() {
                let k = k as u64;
                let s = split_point(start_ms, span, k, n);
                let e = split_point(start_ms, span, k + 1, n);
                out.push(CharacterTiming::new(ch, s, e - s));
            }
            last_end = end_ms;
        }

        if discarded > 0 {
            warn!(discarded, kept = out.len(), "alignment contained malformed entries");
        }
        tag_words(&mut out);
        out
    }
}

/// Assign each non-boundary character the word it belongs to.
fn tag_words(timings: &mut [CharacterTiming]) {
    let mut i = 0;
    while i < timings.len() {
        if crate::viseme::is_boundary(timings[i].ch) {
            i += 1;
            continue;
        }
        let start = i;
        while i < timings.len() && !crate::viseme::is_boundary(timings[i].ch) {
            i += 1;
        }
        let word: String = timings[start..i].iter().map(|t| t.ch).collect();
        for t in &mut timings[start..i] {
            t.word = Some(word.clone());
        }
    }
}
