//! **Alignment grouper**: collapse per-character timings into phoneme-like groups.
//!
//! A group closes when:
//! - a whitespace/punctuation entry is seen (the entry itself is dropped),
//! - a vowel is followed by a consonant (peak-then-fall),
//! - the group reaches `max_group_size` symbols,
//! - the word changes or the utterance ends.
//!
//! A group with no duration is carried into the next one. If that pushes the merged group
//! past `max_group_size`, it is split again and its time shared evenly.
//!
//! Adjacent characters that spell one sound (`t`+`h`) are merged into a single symbol
//! spanning both timings before any of the rules above are applied.

use crate::timing::{split_point, CharacterTiming, PhonemeGroup};
use crate::viseme::{is_boundary, is_digraph, is_vowel};
use tracing::{debug, warn};

/// Group an ordered, single-utterance character sequence.
pub fn group_characters(timings: &[CharacterTiming], max_group_size: usize) -> Vec<PhonemeGroup> {
    let mut state = GroupState::new(max_group_size.max(1));
    let mut last_end: Option<u64> = None;

    let mut i = 0;
    while i < timings.len() {
        let t = &timings[i];
        if is_boundary(t.ch) {
            state.close();
            i += 1;
            continue;
        }
        if let Some(prev_end) = last_end {
            if t.start_ms < prev_end {
                warn!(ch = %t.ch, start_ms = t.start_ms, prev_end, "grouper: dropping overlapping character");
                i += 1;
                continue;
            }
        }

        let (symbol, start_ms, end_ms, consumed) = match timings.get(i + 1) {
            Some(next) if forms_digraph(t, next) => (
                lower(t.ch) + &lower(next.ch),
                t.start_ms,
                next.end_ms(),
                2,
            ),
            _ => (lower(t.ch), t.start_ms, t.end_ms(), 1),
        };
        last_end = Some(end_ms);

        state.push(symbol, start_ms, end_ms, t.word.as_deref());
        i += consumed;
    }

    state.finish()
}

fn forms_digraph(a: &CharacterTiming, b: &CharacterTiming) -> bool {
    !is_boundary(b.ch) && is_digraph(a.ch, b.ch) && b.start_ms >= a.end_ms() && a.word == b.word
}

fn lower(ch: char) -> String {
    ch.to_lowercase().collect()
}

struct GroupState {
    max_group_size: usize,
    groups: Vec<PhonemeGroup>,
    symbols: Vec<String>,
    start_ms: u64,
    end_ms: u64,
    word: Option<String>,
    /// Symbols of a closed group that had no duration; folded into the next group.
    carry: Option<(Vec<String>, u64)>,
}

impl GroupState {
    fn new(max_group_size: usize) -> Self {
        Self {
            max_group_size,
            groups: Vec::new(),
            symbols: Vec::new(),
            start_ms: 0,
            end_ms: 0,
            word: None,
            carry: None,
        }
    }

    fn push(&mut self, symbol: String, start_ms: u64, end_ms: u64, word: Option<&str>) {
        if !self.symbols.is_empty() {
            let word_changed = match (self.word.as_deref(), word) {
                (Some(a), Some(b)) => a != b,
                _ => false,
            };
            let peak_then_fall = self.symbols.last().map(|s| is_vowel(s)).unwrap_or(false)
                && !is_vowel(&symbol);
            if word_changed || peak_then_fall {
                self.close();
            }
        }

        if self.symbols.is_empty() {
            self.start_ms = start_ms;
            self.end_ms = end_ms;
            self.word = word.map(str::to_string);
        } else {
            self.start_ms = self.start_ms.min(start_ms);
            self.end_ms = self.end_ms.max(end_ms);
        }
        self.symbols.push(symbol);

        if self.symbols.len() >= self.max_group_size {
            self.close();
        }
    }

    fn close(&mut self) {
        if self.symbols.is_empty() {
            return;
        }
        let mut symbols = std::mem::take(&mut self.symbols);
        let mut start_ms = self.start_ms;
        self.word = None;

        if let Some((mut carried, carried_start)) = self.carry.take() {
            carried.append(&mut symbols);
            symbols = carried;
            start_ms = start_ms.min(carried_start);
        }

        if self.end_ms <= start_ms {
            // Zero-length group: keep the symbols, let the next group absorb them.
            debug!(symbols = ?symbols, at_ms = start_ms, "grouper: carrying zero-length group");
            self.carry = Some((symbols, start_ms));
            return;
        }

        let end_ms = self.end_ms;
        self.emit(symbols, start_ms, end_ms);
    }

    /// Push `symbols` as one or more groups of at most `max_group_size`, splitting
    /// `[start_ms, end_ms]` evenly between them. A span too short to give every chunk a
    /// millisecond stays a single oversized group.
    fn emit(&mut self, symbols: Vec<String>, start_ms: u64, end_ms: u64) {
        let span = end_ms - start_ms;
        let chunks = symbols.len().div_ceil(self.max_group_size) as u64;
        if chunks <= 1 || span < chunks {
            debug!(symbols = ?symbols, start_ms, end_ms, "grouper: closed group");
            self.groups.push(PhonemeGroup {
                symbols,
                start_ms,
                end_ms,
            });
            return;
        }

        debug!(
            symbols = symbols.len(),
            chunks,
            start_ms,
            end_ms,
            "grouper: splitting carried group"
        );
        for (k, chunk) in symbols.chunks(self.max_group_size).enumerate() {
            let k = k as u64;
            self.groups.push(PhonemeGroup {
                symbols: chunk.to_vec(),
                start_ms: split_point(start_ms, span, k, chunks),
                end_ms: split_point(start_ms, span, k + 1, chunks),
            });
        }
    }

    fn finish(mut self) -> Vec<PhonemeGroup> {
        self.close();
        if let Some((carried, _)) = self.carry.take() {
            match self.groups.pop() {
                Some(mut last) => {
                    last.symbols.extend(carried);
                    self.emit(last.symbols, last.start_ms, last.end_ms);
                }
                None => debug!(symbols = ?carried, "grouper: utterance has no duration; dropping"),
            }
        }
        self.groups
    }
}
