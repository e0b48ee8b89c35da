//! Speech-service alignment: the collaborator seam, an HTTP client, and a timeline cache.
//!
//! Alignment retrieval is the only suspension point in the lip-sync core. Everything
//! after it (grouping, smoothing, scheduling) is synchronous.

use crate::error::{LipSyncError, LipSyncResult};
use crate::timing::{AlignmentTimestamps, TimeUnit, Timeline};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Supplies per-character timing for a text spoken with a given voice.
#[async_trait]
pub trait AlignmentSource: Send + Sync {
    async fn fetch_alignment(&self, text: &str, voice_id: &str) -> LipSyncResult<AlignmentTimestamps>;
}

/// Collapse whitespace runs and trim. Used for dedupe and cache keys.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Source that never has alignment; forces the fallback estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderAlignment;

#[async_trait]
impl AlignmentSource for PlaceholderAlignment {
    async fn fetch_alignment(&self, _text: &str, _voice_id: &str) -> LipSyncResult<AlignmentTimestamps> {
        Err(LipSyncError::AlignmentUnavailable(
            "no alignment source configured".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct CharacterAlignment {
    #[serde(default)]
    characters: Vec<String>,
    #[serde(default)]
    character_start_times_seconds: Vec<f64>,
    #[serde(default)]
    character_end_times_seconds: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct TimestampedSpeech {
    alignment: Option<CharacterAlignment>,
    normalized_alignment: Option<CharacterAlignment>,
}

/// Parse a `with-timestamps` response body. Prefers `alignment` over `normalized_alignment`.
pub fn parse_alignment_response(body: &str) -> LipSyncResult<AlignmentTimestamps> {
    let speech: TimestampedSpeech = serde_json::from_str(body)?;
    let block = speech
        .alignment
        .or(speech.normalized_alignment)
        .ok_or_else(|| {
            LipSyncError::AlignmentUnavailable("response carries no alignment block".to_string())
        })?;
    let alignment = AlignmentTimestamps::from_parallel(
        &block.characters,
        &block.character_start_times_seconds,
        &block.character_end_times_seconds,
        TimeUnit::Seconds,
    );
    if alignment.is_empty() {
        return Err(LipSyncError::AlignmentUnavailable(
            "alignment block is empty".to_string(),
        ));
    }
    Ok(alignment)
}

/// ElevenLabs-style text-to-speech endpoint that returns character timestamps.
/// Uses `ELEVENLABS_API_URL` (default https://api.elevenlabs.io), `ELEVENLABS_API_KEY`
/// and `ELEVENLABS_MODEL`.
#[derive(Debug, Clone)]
pub struct ElevenLabsAlignment {
    /// Base URL without trailing slash.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    client: reqwest::Client,
}

impl ElevenLabsAlignment {
    pub fn from_env(timeout_ms: u64) -> LipSyncResult<Self> {
        let base_url = std::env::var("ELEVENLABS_API_URL")
            .unwrap_or_else(|_| "https://api.elevenlabs.io".to_string());
        let api_key = std::env::var("ELEVENLABS_API_KEY")
            .map_err(|_| LipSyncError::Config("alignment requires ELEVENLABS_API_KEY".to_string()))?;
        let model = std::env::var("ELEVENLABS_MODEL")
            .unwrap_or_else(|_| "eleven_multilingual_v2".to_string());
        Self::new(base_url, api_key, model, timeout_ms)
    }

    /// Create with explicit config (e.g. for tests or non-env wiring).
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_ms: u64,
    ) -> LipSyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    fn endpoint(&self, voice_id: &str) -> String {
        format!(
            "{}/v1/text-to-speech/{}/with-timestamps",
            self.base_url.trim_end_matches('/'),
            voice_id
        )
    }
}

#[async_trait]
impl AlignmentSource for ElevenLabsAlignment {
    async fn fetch_alignment(&self, text: &str, voice_id: &str) -> LipSyncResult<AlignmentTimestamps> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LipSyncError::AlignmentUnavailable("empty text".to_string()));
        }
        let body = serde_json::json!({
            "text": text,
            "model_id": self.model,
        });
        let res = self
            .client
            .post(self.endpoint(voice_id))
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LipSyncError::AlignmentHttp(format!(
                "alignment API error {}: {}",
                status, body
            )));
        }
        let raw = res.text().await?;
        let alignment = parse_alignment_response(&raw)?;
        debug!(voice = voice_id, characters = alignment.entries.len(), "alignment: fetched");
        Ok(alignment)
    }
}

/// Hit/miss counters for [`AlignmentCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Timelines keyed by normalized text and voice.
///
/// Concurrent requests for one key share a single in-flight build. Failed builds are not
/// cached. When full, an arbitrary entry is evicted. Capacity 0 disables caching.
pub struct AlignmentCache {
    entries: DashMap<String, Arc<OnceCell<Timeline>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AlignmentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key(text: &str, voice_id: &str) -> String {
        format!("{}\u{1f}{}", voice_id, normalize_text(text))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Cached timeline for `(text, voice_id)`, or run `build` once for every waiter.
    pub async fn get_or_try_build<F, Fut>(
        &self,
        text: &str,
        voice_id: &str,
        build: F,
    ) -> LipSyncResult<Timeline>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LipSyncResult<Timeline>>,
    {
        if self.capacity == 0 {
            return build().await;
        }

        let key = Self::key(text, voice_id);
        let cell = self.cell_for(&key);
        if let Some(timeline) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(voice = voice_id, "alignment cache: hit");
            return Ok(timeline.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        match cell.get_or_try_init(build).await {
            Ok(timeline) => Ok(timeline.clone()),
            Err(e) => {
                self.entries.remove_if(&key, |_, c| c.get().is_none());
                Err(e)
            }
        }
    }

    fn cell_for(&self, key: &str) -> Arc<OnceCell<Timeline>> {
        if let Some(existing) = self.entries.get(key) {
            return Arc::clone(existing.value());
        }
        if self.entries.len() >= self.capacity {
            let victim = self.entries.iter().next().map(|e| e.key().clone());
            if let Some(victim) = victim {
                self.entries.remove(&victim);
                info!(capacity = self.capacity, "alignment cache: evicted one entry");
            }
        }
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()));
        Arc::clone(entry.value())
    }
}

impl Default for AlignmentCache {
    fn default() -> Self {
        Self::new(256)
    }
}
