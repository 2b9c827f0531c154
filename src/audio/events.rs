//! Outward events consumed by the bridge/messaging layer

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Interruption notice forwarded to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptionKind {
    Began,
    Ended,
    Unknown,
}

impl InterruptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Began => "began",
            Self::Ended => "ended",
            Self::Unknown => "unknown",
        }
    }
}

/// Events emitted by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Int16 little-endian PCM, 16 kHz mono
    MicrophoneData(Bytes),
    /// Mean absolute amplitude of the last microphone buffer (unnormalized)
    RawInputLevel(f32),
    /// Perceptual input level in [0, 1]
    InputVolume(f32),
    /// Perceptual output level in [0, 1]
    OutputVolume(f32),
    AudioInterruption(InterruptionKind),
}

impl AudioEvent {
    /// Event name used on the bridge
    pub fn name(&self) -> &'static str {
        match self {
            Self::MicrophoneData(_) => "microphoneData",
            Self::RawInputLevel(_) => "rawInputLevel",
            Self::InputVolume(_) => "inputVolume",
            Self::OutputVolume(_) => "outputVolume",
            Self::AudioInterruption(_) => "audioInterruption",
        }
    }

    /// JSON rendering for logs and text bridges.
    /// Microphone payloads are summarized, not dumped.
    pub fn to_json(&self) -> serde_json::Value {
        let payload = match self {
            Self::MicrophoneData(bytes) => json!({ "bytes": bytes.len(), "samples": bytes.len() / 2 }),
            Self::RawInputLevel(level) | Self::InputVolume(level) | Self::OutputVolume(level) => {
                json!(level)
            }
            Self::AudioInterruption(kind) => json!(kind),
        };
        json!({ "event": self.name(), "payload": payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interruption_kind_serialization() {
        assert_eq!(serde_json::to_string(&InterruptionKind::Began).unwrap(), "\"began\"");
        assert_eq!(InterruptionKind::Unknown.as_str(), "unknown");
    }

    #[test]
    fn test_event_json() {
        let event = AudioEvent::MicrophoneData(Bytes::from_static(&[0, 0, 1, 0]));
        let value = event.to_json();
        assert_eq!(value["event"], "microphoneData");
        assert_eq!(value["payload"]["samples"], 2);

        let value = AudioEvent::AudioInterruption(InterruptionKind::Ended).to_json();
        assert_eq!(value["payload"], "ended");
    }
}
