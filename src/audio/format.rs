//! Stream formats and playback buffers

use std::time::Duration;

use crate::constants::{BIT_DEPTH, CHANNEL_COUNT};
use crate::error::AudioError;

/// Mono 16-bit PCM stream format
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    sample_rate_hz: f64,
    channel_count: u16,
    bit_depth: u16,
}

impl AudioFormat {
    /// Create a mono 16-bit format, rejecting nonsensical rates
    pub fn mono(sample_rate_hz: f64) -> Result<Self, AudioError> {
        Self::new(sample_rate_hz, CHANNEL_COUNT)
    }

    pub fn new(sample_rate_hz: f64, channel_count: u16) -> Result<Self, AudioError> {
        if !sample_rate_hz.is_finite() || sample_rate_hz <= 0.0 {
            return Err(AudioError::FormatConstruction(format!(
                "sample rate {} Hz",
                sample_rate_hz
            )));
        }
        if channel_count != CHANNEL_COUNT {
            return Err(AudioError::FormatConstruction(format!(
                "{} channels (only mono is supported)",
                channel_count
            )));
        }
        Ok(Self {
            sample_rate_hz,
            channel_count,
            bit_depth: BIT_DEPTH,
        })
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn bit_depth(&self) -> u16 {
        self.bit_depth
    }

    /// Frames covering `duration` at this rate (32 ms -> 512 @ 16k, 768 @ 24k)
    pub fn frames_for(&self, duration: Duration) -> u32 {
        (self.sample_rate_hz * duration.as_secs_f64()).round() as u32
    }
}

/// One scheduled chunk of playback audio
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    samples: Vec<f32>,
    format: AudioFormat,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, format: AudioFormat) -> Result<Self, AudioError> {
        if samples.is_empty() {
            return Err(AudioError::MalformedPlayback("zero frames".into()));
        }
        Ok(Self { samples, format })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Frame count (mono, so equal to sample count)
    pub fn frame_length(&self) -> usize {
        self.samples.len()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.format.sample_rate_hz)
    }
}
