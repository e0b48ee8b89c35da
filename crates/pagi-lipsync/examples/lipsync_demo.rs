//! Example: Lip Sync Demo
//!
//! Plays viseme timelines for a few utterances on the real Tokio clock and prints every
//! mouth-shape change. With `ELEVENLABS_API_KEY` set, alignment is fetched from the
//! speech service; otherwise the configured fallback estimator is used.
//!
//! Run with: `cargo run -p pagi-lipsync --example lipsync_demo`

use pagi_lipsync::{
    AlignmentSource, ElevenLabsAlignment, LipSyncConfig, OnVisemeChange, TokioTimer,
    TurnController, TurnOutcome, Utterance,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("👄 PAGI Lip Sync Demo");
    info!("=====================");

    let config = LipSyncConfig::load()?;
    let profile = config.profile;
    info!(
        profile = ?profile,
        fallback = ?config.fallback,
        min_dwell_ms = config.min_dwell_ms,
        "Config loaded"
    );

    let started = Instant::now();
    let on_change: OnVisemeChange = Arc::new(move |code| {
        println!("  {:>6} ms  viseme {:>2}", started.elapsed().as_millis(), code);
    });

    let timer = Arc::new(TokioTimer::new()?);
    let timeout_ms = config.alignment_timeout_ms;
    let mut controller = TurnController::new(config, timer, on_change);
    match ElevenLabsAlignment::from_env(timeout_ms) {
        Ok(client) => {
            info!("Using speech-service alignment");
            let source: Arc<dyn AlignmentSource> = Arc::new(client);
            controller = controller.with_alignment_source(source);
        }
        Err(e) => warn!("{} (falling back to estimated timing)", e),
    }

    let lines = [
        ("Hi", 400u64),
        ("Nice to meet you.", 1600),
        ("Nice to meet you.", 1600),
        ("Let me check that for you.", 2200),
    ];

    for (text, duration_ms) in lines {
        info!("🗣️ \"{}\"", text);
        let outcome = controller
            .speak(Utterance::new(text).with_audio_duration_ms(duration_ms))
            .await;
        match outcome {
            TurnOutcome::Scheduled { origin, visemes, .. } => {
                info!("   {} visemes from {}", visemes, origin.as_str());
            }
            TurnOutcome::Duplicate => info!("   duplicate delivery skipped"),
            TurnOutcome::Silent => info!("   nothing to say"),
            TurnOutcome::Superseded => info!("   superseded by a newer turn"),
        }
        tokio::time::sleep(Duration::from_millis(duration_ms / 2)).await;
    }

    // Let the last line finish and return to neutral.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    controller.metrics().log_summary();

    let snapshot = controller.metrics().snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
