//! Duplex Monitor
//!
//! Runs the voice engine on the default desktop devices, records from the
//! microphone, plays a short test tone and prints engine events until Ctrl+C.

use anyhow::Result;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::TryRecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_duplex::{
    audio::convert::{f32_to_i16, i16_to_le_bytes},
    platform::{cpal_backend, SessionNotification},
    AudioEvent, EngineConfig, VoiceEngine,
};

/// Test tone: 440 Hz for half a second at the output rate
fn test_tone(sample_rate: f64) -> Vec<i16> {
    let frames = (sample_rate * 0.5) as usize;
    (0..frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            f32_to_i16(0.25 * (TAU * 440.0 * t).sin())
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting duplex monitor");

    let config = match EngineConfig::default_path() {
        Some(path) if path.exists() => {
            tracing::info!("Loading config from {}", path.display());
            EngineConfig::load(&path)?
        }
        _ => EngineConfig::default(),
    };

    let engine = Arc::new(VoiceEngine::new(config));
    let mut events = engine.subscribe();

    let backend = cpal_backend::platform();
    let notifications = backend.notifications.clone();
    engine.initialize(backend)?;

    let running = Arc::new(AtomicBool::new(true));
    let running_for_signal = running.clone();
    ctrlc::set_handler(move || {
        running_for_signal.store(false, Ordering::SeqCst);
    })?;

    engine.toggle_recording(true);
    let tone = test_tone(engine.config().output_sample_rate);
    engine.play_pcm_data(&i16_to_le_bytes(&tone));

    let mut mic_bytes = 0usize;
    let mut last_stats_time = Instant::now();

    while running.load(Ordering::SeqCst) {
        loop {
            match events.try_recv() {
                Ok(AudioEvent::MicrophoneData(bytes)) => mic_bytes += bytes.len(),
                // Levels arrive every IO cycle; only the periodic summary shows them
                Ok(AudioEvent::RawInputLevel(_))
                | Ok(AudioEvent::InputVolume(_))
                | Ok(AudioEvent::OutputVolume(_)) => {}
                Ok(event) => println!("{}", event.to_json()),
                Err(TryRecvError::Lagged(n)) => tracing::warn!("Event receiver lagged by {}", n),
                Err(_) => break,
            }
        }

        if last_stats_time.elapsed() >= Duration::from_secs(1) {
            last_stats_time = Instant::now();
            // No route notifications on desktop; let the pipeline self-heal
            notifications.post(SessionNotification::ConfigurationChange);

            tracing::info!(
                "mic {} bytes/s, input {:.2}, output {:.2}, dropped {}",
                mic_bytes,
                engine.input_level(),
                engine.output_level(),
                engine.dropped_tap_messages()
            );
            mic_bytes = 0;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tracing::info!("Shutting down");
    engine.tear_down();
    Ok(())
}
