//! Platform seams
//!
//! The pipeline never talks to an OS audio API directly. It drives:
//! - a [`SessionControl`] (category, preferred rate/IO duration, activation)
//! - an [`AudioGraph`] (input node, player node, mixed output, taps)
//! - a [`NotificationHub`] fed by the platform's interruption/route/reset events
//!
//! Backends: [`virtual_device`] (in-process, used by tests and headless hosts)
//! and `cpal_backend` (desktop, feature `cpal-backend`).

use std::time::Duration;

use crate::audio::{AudioFormat, PlaybackBuffer};
use crate::error::AudioError;

#[cfg(feature = "cpal-backend")]
pub mod cpal_backend;
pub mod notifications;
pub mod virtual_device;

pub use notifications::{InterruptionPhase, NotificationHub, SessionNotification, Subscription};
pub use virtual_device::VirtualDevice;

/// Real-time tap callback; receives one mono float buffer per invocation
pub type TapBlock = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Audio session category and routing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCategory {
    /// Simultaneous record + play
    pub play_and_record: bool,
    /// Voice-chat tuned processing and routing
    pub voice_chat_mode: bool,
    /// Route to the loudspeaker instead of the receiver
    pub default_to_speaker: bool,
    /// Bluetooth hands-free (classic)
    pub allow_bluetooth: bool,
    /// Bluetooth A2DP / LE audio
    pub allow_bluetooth_high_quality: bool,
    /// Mix with other apps' audio
    pub mix_with_others: bool,
}

impl SessionCategory {
    /// The only category this engine uses
    pub fn voice_chat() -> Self {
        Self {
            play_and_record: true,
            voice_chat_mode: true,
            default_to_speaker: true,
            allow_bluetooth: true,
            allow_bluetooth_high_quality: true,
            mix_with_others: false,
        }
    }
}

/// Platform audio session
pub trait SessionControl: Send {
    fn set_category(&mut self, category: &SessionCategory) -> Result<(), AudioError>;

    fn set_preferred_sample_rate(&mut self, rate_hz: f64) -> Result<(), AudioError>;

    fn set_preferred_io_buffer_duration(&mut self, duration: Duration) -> Result<(), AudioError>;

    fn set_active(&mut self, active: bool) -> Result<(), AudioError>;
}

/// Platform processing graph: input node, player node, main mixer
pub trait AudioGraph: Send {
    /// Enable the platform echo canceller on the input node
    fn set_voice_processing_enabled(&mut self, enabled: bool) -> Result<(), AudioError>;

    /// Tap on the (voice-processed) input node
    fn install_input_tap(
        &mut self,
        buffer_frames: u32,
        format: AudioFormat,
        tap: TapBlock,
    ) -> Result<(), AudioError>;

    /// Tap on the mixed output
    fn install_output_tap(
        &mut self,
        buffer_frames: u32,
        format: AudioFormat,
        tap: TapBlock,
    ) -> Result<(), AudioError>;

    fn remove_taps(&mut self);

    fn start(&mut self) -> Result<(), AudioError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Drop all node state after a media services reset
    fn reset(&mut self);

    /// Hardware-level input mute
    fn set_input_muted(&mut self, muted: bool);

    /// Enqueue a buffer on the player node
    fn schedule(&mut self, buffer: PlaybackBuffer) -> Result<(), AudioError>;

    fn play(&mut self);

    /// Stop the player and drop everything queued
    fn stop_player(&mut self);

    fn is_playing(&self) -> bool;
}

/// Everything the engine needs from a platform
pub struct PlatformBackend {
    pub session: Box<dyn SessionControl>,
    pub graph: Box<dyn AudioGraph>,
    pub notifications: NotificationHub,
}

impl PlatformBackend {
    pub fn new(
        session: Box<dyn SessionControl>,
        graph: Box<dyn AudioGraph>,
        notifications: NotificationHub,
    ) -> Self {
        Self {
            session,
            graph,
            notifications,
        }
    }
}
