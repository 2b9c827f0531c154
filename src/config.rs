//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Microphone capture rate
    pub input_sample_rate: f64,

    /// Playback rate
    pub output_sample_rate: f64,

    /// Preferred hardware IO buffer duration in ms (also sets tap sizes)
    pub io_buffer_duration_ms: u32,

    /// Samples kept by each level meter
    pub level_buffer_capacity: usize,

    /// Microphone suppression after the first playback chunk, in ms
    pub discard_window_ms: u64,

    /// Capacity of the real-time handoff queue
    pub handoff_queue_capacity: usize,

    /// Capacity of the outward event channel
    pub event_channel_capacity: usize,

    /// Drop queued playback when the host app goes to background
    pub clear_queue_on_background: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: INPUT_SAMPLE_RATE as f64,
            output_sample_rate: OUTPUT_SAMPLE_RATE as f64,
            io_buffer_duration_ms: IO_BUFFER_DURATION_MS,
            level_buffer_capacity: LEVEL_BUFFER_CAPACITY,
            discard_window_ms: DISCARD_WINDOW_MS,
            handoff_queue_capacity: HANDOFF_QUEUE_CAPACITY,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
            clear_queue_on_background: true,
        }
    }
}

impl EngineConfig {
    /// Preferred IO buffer duration
    pub fn io_buffer_duration(&self) -> Duration {
        Duration::from_millis(self.io_buffer_duration_ms as u64)
    }

    /// Discard window length
    pub fn discard_window(&self) -> Duration {
        Duration::from_millis(self.discard_window_ms)
    }

    /// Load configuration from file
    pub fn load(path: &PathBuf) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self, path: &PathBuf) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "voice-duplex", "voice-duplex")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
