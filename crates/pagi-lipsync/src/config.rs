//! Lip-sync configuration.
//!
//! Dwell time, reset buffer and the viseme profile vary between avatar rigs, so none of
//! them are hard-coded. Values come from (lowest to highest precedence) built-in defaults,
//! an optional TOML file, and `PAGI_LIPSYNC_*` environment variables.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | PAGI_LIPSYNC_CONFIG | config/lipsync | Path (extension optional) of the TOML file. |
//! | PAGI_LIPSYNC_MIN_DWELL_MS | 100 | Minimum time a viseme is held. |
//! | PAGI_LIPSYNC_RESET_BUFFER_MS | 150 | Delay between last viseme end and neutral reset. |
//! | PAGI_LIPSYNC_MAX_GROUP_SIZE | 3 | Max symbols per phoneme group. |
//! | PAGI_LIPSYNC_PAUSE_THRESHOLD_MS | 300 | Gaps at least this long close the mouth. |
//! | PAGI_LIPSYNC_FIXED_RATE_CHAR_MS | 120 | Per-character duration for text-only playback. |
//! | PAGI_LIPSYNC_PLACEHOLDER_DURATION_MS | 1000 | Nominal length of the placeholder timeline. |
//! | PAGI_LIPSYNC_PROFILE | oculus15 | `oculus15` \| `compact10`. |
//! | PAGI_LIPSYNC_TIE_BREAK | first_non_neutral | `first_non_neutral` \| `first_encountered`. |
//! | PAGI_LIPSYNC_FALLBACK | word_split | `word_split` \| `fixed_rate`. |
//! | PAGI_LIPSYNC_CACHE_CAPACITY | 256 | Max cached timelines (0 disables the cache). |
//! | PAGI_LIPSYNC_ALIGNMENT_TIMEOUT_MS | 5000 | HTTP timeout for the alignment service. |

use crate::error::{LipSyncError, LipSyncResult};
use crate::smoother::{SmootherConfig, TieBreak};
use crate::viseme::VisemeProfile;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which estimator to use when the speech service returns no per-character alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    /// Equal time slice per word over the audio duration.
    #[default]
    WordSplit,
    /// Fixed duration per character; needs no audio duration.
    FixedRate,
}

fn default_min_dwell_ms() -> u64 {
    100
}

fn default_reset_buffer_ms() -> u64 {
    150
}

fn default_max_group_size() -> usize {
    3
}

fn default_pause_threshold_ms() -> u64 {
    300
}

fn default_fixed_rate_char_ms() -> u64 {
    120
}

fn default_placeholder_duration_ms() -> u64 {
    1000
}

fn default_cache_capacity() -> usize {
    256
}

fn default_alignment_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LipSyncConfig {
    #[serde(default = "default_min_dwell_ms")]
    pub min_dwell_ms: u64,
    #[serde(default = "default_reset_buffer_ms")]
    pub reset_buffer_ms: u64,
    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,
    /// 0 disables pause insertion.
    #[serde(default = "default_pause_threshold_ms")]
    pub pause_threshold_ms: u64,
    #[serde(default = "default_fixed_rate_char_ms")]
    pub fixed_rate_char_ms: u64,
    #[serde(default = "default_placeholder_duration_ms")]
    pub placeholder_duration_ms: u64,
    #[serde(default)]
    pub profile: VisemeProfile,
    #[serde(default)]
    pub tie_break: TieBreak,
    #[serde(default)]
    pub fallback: FallbackKind,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_alignment_timeout_ms")]
    pub alignment_timeout_ms: u64,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            min_dwell_ms: default_min_dwell_ms(),
            reset_buffer_ms: default_reset_buffer_ms(),
            max_group_size: default_max_group_size(),
            pause_threshold_ms: default_pause_threshold_ms(),
            fixed_rate_char_ms: default_fixed_rate_char_ms(),
            placeholder_duration_ms: default_placeholder_duration_ms(),
            profile: VisemeProfile::default(),
            tie_break: TieBreak::default(),
            fallback: FallbackKind::default(),
            cache_capacity: default_cache_capacity(),
            alignment_timeout_ms: default_alignment_timeout_ms(),
        }
    }
}

impl LipSyncConfig {
    /// Load from `PAGI_LIPSYNC_CONFIG` (default `config/lipsync`, missing file is fine) and env.
    pub fn load() -> LipSyncResult<Self> {
        let path =
            std::env::var("PAGI_LIPSYNC_CONFIG").unwrap_or_else(|_| "config/lipsync".to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from an explicit file path plus `PAGI_LIPSYNC_*` env overrides.
    pub fn load_from(path: &Path) -> LipSyncResult<Self> {
        let file = path
            .to_str()
            .ok_or_else(|| LipSyncError::Config(format!("non UTF-8 config path: {:?}", path)))?;

        let built = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("PAGI_LIPSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: LipSyncConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document. Missing keys take defaults.
    pub fn from_toml_str(content: &str) -> LipSyncResult<Self> {
        let cfg: LipSyncConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read one TOML file with no env overrides. Unlike [`load_from`](Self::load_from), the
    /// file must exist.
    pub fn from_toml_file(path: &Path) -> LipSyncResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> LipSyncResult<()> {
        if self.min_dwell_ms == 0 {
            return Err(LipSyncError::Config("min_dwell_ms must be > 0".to_string()));
        }
        if self.max_group_size == 0 {
            return Err(LipSyncError::Config("max_group_size must be > 0".to_string()));
        }
        if self.fixed_rate_char_ms == 0 {
            return Err(LipSyncError::Config("fixed_rate_char_ms must be > 0".to_string()));
        }
        if self.pause_threshold_ms != 0 && self.pause_threshold_ms < self.min_dwell_ms {
            return Err(LipSyncError::Config(format!(
                "pause_threshold_ms ({}) must be 0 or >= min_dwell_ms ({})",
                self.pause_threshold_ms, self.min_dwell_ms
            )));
        }
        Ok(())
    }

    pub fn smoother(&self) -> SmootherConfig {
        SmootherConfig {
            min_dwell_ms: self.min_dwell_ms,
            reset_buffer_ms: self.reset_buffer_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LipSyncConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.min_dwell_ms, 100);
        assert_eq!(cfg.profile, VisemeProfile::Oculus15);
    }

    #[test]
    fn toml_overrides_and_defaults_mix() {
        let cfg = LipSyncConfig::from_toml_str(
            r#"
            min_dwell_ms = 120
            profile = "compact10"
            fallback = "fixed_rate"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.min_dwell_ms, 120);
        assert_eq!(cfg.profile, VisemeProfile::Compact10);
        assert_eq!(cfg.fallback, FallbackKind::FixedRate);
        assert_eq!(cfg.reset_buffer_ms, 150);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(LipSyncConfig::from_toml_str("min_dwell_ms = 0").is_err());
        assert!(LipSyncConfig::from_toml_str("max_group_size = 0").is_err());
        assert!(LipSyncConfig::from_toml_str("pause_threshold_ms = 50").is_err());
        assert!(LipSyncConfig::from_toml_str("pause_threshold_ms = 0").is_ok());
    }

    #[test]
    fn toml_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = LipSyncConfig::from_toml_file(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(LipSyncError::Io(_))));
        assert!(!missing.unwrap_err().is_recoverable_by_fallback());

        let path = dir.path().join("lipsync.toml");
        std::fs::write(&path, "max_group_size = 2\n").unwrap();
        let cfg = LipSyncConfig::from_toml_file(&path).unwrap();
        assert_eq!(cfg.max_group_size, 2);
    }
}
