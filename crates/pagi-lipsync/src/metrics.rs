//! Operability counters: visemes generated, alignment latency, fallback usage.
//! These never influence behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

use crate::timing::TimelineOrigin;

#[derive(Debug, Default)]
pub struct LipSyncMetrics {
    utterances_scheduled: AtomicU64,
    duplicates_skipped: AtomicU64,
    interruptions: AtomicU64,
    fallback_uses: AtomicU64,
    placeholder_uses: AtomicU64,
    alignment_failures: AtomicU64,
    visemes_generated: AtomicU64,
    last_alignment_latency_ms: AtomicU64,
}

/// Point-in-time copy of [`LipSyncMetrics`], serializable for status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub utterances_scheduled: u64,
    pub duplicates_skipped: u64,
    pub interruptions: u64,
    pub fallback_uses: u64,
    pub placeholder_uses: u64,
    pub alignment_failures: u64,
    pub visemes_generated: u64,
    pub last_alignment_latency_ms: u64,
}

impl LipSyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One timeline handed to the scheduler.
    pub fn record_scheduled(&self, origin: TimelineOrigin, visemes: usize) {
        self.utterances_scheduled.fetch_add(1, Ordering::Relaxed);
        self.visemes_generated
            .fetch_add(visemes as u64, Ordering::Relaxed);
        if origin.is_fallback() {
            self.fallback_uses.fetch_add(1, Ordering::Relaxed);
        }
        if origin == TimelineOrigin::Placeholder {
            self.placeholder_uses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alignment_latency(&self, latency: Duration) {
        self.last_alignment_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_alignment_failure(&self) {
        self.alignment_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            taken_at: Utc::now(),
            utterances_scheduled: self.utterances_scheduled.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            fallback_uses: self.fallback_uses.load(Ordering::Relaxed),
            placeholder_uses: self.placeholder_uses.load(Ordering::Relaxed),
            alignment_failures: self.alignment_failures.load(Ordering::Relaxed),
            visemes_generated: self.visemes_generated.load(Ordering::Relaxed),
            last_alignment_latency_ms: self.last_alignment_latency_ms.load(Ordering::Relaxed),
        }
    }

    /// Emit the current counters as one structured log line.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            utterances = s.utterances_scheduled,
            duplicates = s.duplicates_skipped,
            interruptions = s.interruptions,
            fallback = s.fallback_uses,
            placeholder = s.placeholder_uses,
            alignment_failures = s.alignment_failures,
            visemes = s.visemes_generated,
            latency_ms = s.last_alignment_latency_ms,
            "📊 lip-sync metrics"
        );
    }
}
