//! **Viseme classifier**: map a character or phoneme symbol to a mouth shape.
//!
//! Classification is a pure table lookup keyed by the lowercased symbol. It is total:
//! whitespace, punctuation, digits and unknown symbols all map to [`Viseme::Sil`].
//! Digraphs (`th`, `ch`, `sh`, `ng`, ...) are table keys in their own right, and
//! [`tokenize`] matches them before single letters so "the" is `th` + `e`, not `t` + `h` + `e`.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Integer viseme code handed to the animation layer.
pub type VisemeCode = u8;

/// Neutral (closed, resting) mouth. Code 0 in every profile.
pub const NEUTRAL: VisemeCode = 0;

/// Canonical mouth shapes (the 15-shape Oculus set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Viseme {
    Sil,
    PP,
    FF,
    TH,
    DD,
    KK,
    CH,
    SS,
    NN,
    RR,
    AA,
    E,
    IH,
    OH,
    OU,
}

impl Viseme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Viseme::Sil => "sil",
            Viseme::PP => "PP",
            Viseme::FF => "FF",
            Viseme::TH => "TH",
            Viseme::DD => "DD",
            Viseme::KK => "kk",
            Viseme::CH => "CH",
            Viseme::SS => "SS",
            Viseme::NN => "nn",
            Viseme::RR => "RR",
            Viseme::AA => "aa",
            Viseme::E => "E",
            Viseme::IH => "ih",
            Viseme::OH => "oh",
            Viseme::OU => "ou",
        }
    }
}

/// Deployed viseme code set. Which one the avatar rig expects is configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisemeProfile {
    /// 15 codes, 0–14, one per canonical shape.
    #[default]
    Oculus15,
    /// 10 codes, 0–9, for rigs with fewer blend shapes.
    Compact10,
}

impl VisemeProfile {
    /// Integer code for a canonical shape under this profile.
    pub fn code(&self, viseme: Viseme) -> VisemeCode {
        match self {
            VisemeProfile::Oculus15 => viseme as VisemeCode,
            VisemeProfile::Compact10 => match viseme {
                Viseme::Sil => 0,
                Viseme::PP => 1,
                Viseme::FF => 2,
                Viseme::TH | Viseme::DD | Viseme::NN => 3,
                Viseme::KK => 4,
                Viseme::CH | Viseme::SS => 5,
                Viseme::AA => 6,
                Viseme::E | Viseme::IH => 7,
                Viseme::OH => 8,
                Viseme::OU | Viseme::RR => 9,
            },
        }
    }

    /// Highest valid code.
    pub fn max_code(&self) -> VisemeCode {
        match self {
            VisemeProfile::Oculus15 => 14,
            VisemeProfile::Compact10 => 9,
        }
    }

    pub fn contains(&self, code: VisemeCode) -> bool {
        code <= self.max_code()
    }

    /// Convenience: classify and map in one step.
    pub fn classify(&self, symbol: &str) -> VisemeCode {
        self.code(classify(symbol))
    }
}

/// Letter pairs that form one sound. Matched before single letters.
const DIGRAPHS: &[&str] = &["th", "ch", "sh", "ng", "ph", "wh", "ck", "oo", "ee", "zh"];

static VISEME_TABLE: Lazy<HashMap<&'static str, Viseme>> = Lazy::new(|| {
    use Viseme::*;
    let entries: &[(&str, Viseme)] = &[
        // Letters
        ("a", AA),
        ("b", PP),
        ("c", KK),
        ("d", DD),
        ("e", E),
        ("f", FF),
        ("g", KK),
        ("h", Sil),
        ("i", IH),
        ("j", CH),
        ("k", KK),
        ("l", NN),
        ("m", PP),
        ("n", NN),
        ("o", OH),
        ("p", PP),
        ("q", KK),
        ("r", RR),
        ("s", SS),
        ("t", DD),
        ("u", OU),
        ("v", FF),
        ("w", OU),
        ("x", SS),
        ("y", IH),
        ("z", SS),
        // Spelling digraphs
        ("th", TH),
        ("ch", CH),
        ("sh", CH),
        ("ng", KK),
        ("ph", FF),
        ("wh", OU),
        ("ck", KK),
        ("oo", OU),
        ("ee", IH),
        ("zh", CH),
        // ARPAbet phonemes (stress digits stripped before lookup)
        ("aa", AA),
        ("ae", AA),
        ("ah", AA),
        ("ao", OH),
        ("aw", AA),
        ("ay", AA),
        ("dh", TH),
        ("eh", E),
        ("er", RR),
        ("ey", E),
        ("hh", Sil),
        ("ih", IH),
        ("iy", IH),
        ("jh", CH),
        ("ow", OH),
        ("oy", OH),
        ("uh", OU),
        ("uw", OU),
        // Aligner silence markers
        ("sil", Sil),
        ("sp", Sil),
        ("spn", Sil),
    ];
    entries.iter().copied().collect()
});

/// Classify one character or phoneme symbol. Total: unknown input is neutral.
pub fn classify(symbol: &str) -> Viseme {
    let lower = symbol.trim().to_lowercase();
    if lower.is_empty() {
        return Viseme::Sil;
    }

    let key = strip_stress(&lower);
    if let Some(v) = VISEME_TABLE.get(key) {
        return *v;
    }

    // Unknown multi-letter token: fall back to its first recognizable unit.
    if key.chars().count() > 1 {
        if let Some(first) = tokenize(key).first() {
            if let Some(v) = VISEME_TABLE.get(first.as_str()) {
                return *v;
            }
        }
    }
    Viseme::Sil
}

/// Classify a single character.
pub fn classify_char(ch: char) -> Viseme {
    let mut buf = [0u8; 4];
    classify(ch.encode_utf8(&mut buf))
}

/// ARPAbet marks stress with a trailing digit (`AA1`). Bare digits are left alone.
fn strip_stress(symbol: &str) -> &str {
    let stripped = symbol.trim_end_matches(|c: char| c.is_ascii_digit());
    if stripped.is_empty() {
        symbol
    } else {
        stripped
    }
}

/// True when `a` followed by `b` spells a single sound.
pub fn is_digraph(a: char, b: char) -> bool {
    let a = a.to_ascii_lowercase();
    let b = b.to_ascii_lowercase();
    DIGRAPHS.iter().any(|d| {
        let mut it = d.chars();
        it.next() == Some(a) && it.next() == Some(b)
    })
}

/// Split a word into sound units, matching digraphs before single letters.
/// Non-alphanumeric characters are dropped.
pub fn tokenize(word: &str) -> Vec<String> {
    let chars: Vec<char> = word
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();

    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if i + 1 < chars.len() && is_digraph(chars[i], chars[i + 1]) {
            tokens.push(chars[i..i + 2].iter().collect());
            i += 2;
        } else {
            tokens.push(chars[i].to_string());
            i += 1;
        }
    }
    tokens
}

/// Vowel-initial symbols open the mouth; used by the grouper's peak-then-fall rule.
pub fn is_vowel(symbol: &str) -> bool {
    symbol
        .chars()
        .next()
        .map(|c| matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u'))
        .unwrap_or(false)
}

/// Whitespace and punctuation carry no mouth shape and end the current group.
pub fn is_boundary(ch: char) -> bool {
    !ch.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_printable_ascii_maps_into_profile() {
        for profile in [VisemeProfile::Oculus15, VisemeProfile::Compact10] {
            for b in 0x20u8..=0x7e {
                let code = profile.classify(&(b as char).to_string());
                assert!(profile.contains(code), "{:?} out of range for {:?}", b as char, profile);
            }
            for d in DIGRAPHS {
                assert!(profile.contains(profile.classify(d)));
            }
        }
    }

    #[test]
    fn whitespace_and_punctuation_are_neutral() {
        for s in [" ", "\t", "\n", ".", ",", "!", "?", "'", "-", ""] {
            assert_eq!(VisemeProfile::Oculus15.classify(s), NEUTRAL, "{:?}", s);
        }
    }

    #[test]
    fn digraphs_win_over_single_letters() {
        assert_eq!(classify("th"), Viseme::TH);
        assert_eq!(classify("t"), Viseme::DD);
        assert_eq!(tokenize("the"), vec!["th", "e"]);
        assert_eq!(tokenize("Shining"), vec!["sh", "i", "n", "i", "ng"]);
        assert_eq!(tokenize("it's"), vec!["i", "t", "s"]);
    }

    #[test]
    fn arpabet_stress_is_stripped() {
        assert_eq!(classify("AA1"), Viseme::AA);
        assert_eq!(classify("UW0"), Viseme::OU);
        assert_eq!(classify("HH"), Viseme::Sil);
        assert_eq!(classify("7"), Viseme::Sil);
    }

    #[test]
    fn unknown_token_uses_first_unit() {
        assert_eq!(classify("bxq"), Viseme::PP);
        assert_eq!(classify("thq"), Viseme::TH);
        assert_eq!(classify("é"), Viseme::Sil);
    }

    #[test]
    fn compact_profile_keeps_neutral_at_zero() {
        assert_eq!(VisemeProfile::Compact10.code(Viseme::Sil), NEUTRAL);
        assert_eq!(VisemeProfile::Compact10.code(Viseme::OU), 9);
        assert_eq!(VisemeProfile::Oculus15.code(Viseme::OU), 14);
    }

    #[test]
    fn vowel_detection() {
        assert!(is_vowel("a"));
        assert!(is_vowel("oo"));
        assert!(is_vowel("AY"));
        assert!(!is_vowel("th"));
        assert!(!is_vowel("y"));
    }
}
