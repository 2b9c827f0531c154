//! Duplex PCM audio pipeline for real-time voice conversation
//!
//! Captures echo-cancelled microphone audio at 16 kHz, plays remote/synthesized
//! audio at 24 kHz and reports live input/output volume levels, while reacting
//! to system audio interruptions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          VOICE ENGINE                            │
//! │   initialize / play_pcm_data / toggle_recording / pause / ...    │
//! │  ┌───────────────┐  ┌────────────────────┐  ┌─────────────────┐  │
//! │  │ DuplexSession │  │   AudioPipeline    │  │  Interruption   │  │
//! │  │ (category,    │  │ input tap  16 kHz  │◄─┤  Controller     │  │
//! │  │  rates, IO)   │  │ output tap 24 kHz  │  │ (began / ended) │  │
//! │  └───────────────┘  │ player queue       │  └────────▲────────┘  │
//! │                     └─────────┬──────────┘           │           │
//! │                      TapMessage (lock-free)    NotificationHub   │
//! │                     ┌─────────▼──────────┐                       │
//! │                     │  EventDispatcher   │──► broadcast<AudioEvent>
//! │                     └────────────────────┘                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod interruption;
pub mod platform;

pub use audio::{AudioEvent, AudioFormat, InterruptionKind, LevelMeter, PlaybackBuffer};
pub use config::EngineConfig;
pub use engine::{AppLifecycle, VoiceEngine};
pub use error::{AudioError, Error, Result};
pub use interruption::{InterruptionController, InterruptionState};
pub use platform::{PlatformBackend, SessionNotification};
