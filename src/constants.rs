//! Fixed parameters of the duplex pipeline

/// Microphone capture rate (tuned for voice processing)
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Playback rate (tuned for synthesized speech fidelity)
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Mono in both directions
pub const CHANNEL_COUNT: u16 = 1;

/// Signed 16-bit PCM on the wire
pub const BIT_DEPTH: u16 = 16;

/// Preferred IO buffer duration: ~512 frames at 16 kHz, ~768 frames at 24 kHz
pub const IO_BUFFER_DURATION_MS: u32 = 32;

/// Samples kept by each level meter
pub const LEVEL_BUFFER_CAPACITY: usize = 2048;

/// Microphone suppression after the first playback chunk
pub const DISCARD_WINDOW_MS: u64 = 2000;

/// Largest tap buffer carried by a single handoff message.
/// Bigger hardware buffers are split across several messages.
pub const MAX_TAP_FRAMES: usize = 2048;

/// Default capacity of the real-time handoff queue (messages)
pub const HANDOFF_QUEUE_CAPACITY: usize = 64;

/// How long a control-thread event may wait for room in the handoff queue
pub const CONTROL_SEND_TIMEOUT_MS: u64 = 250;

/// Default capacity of the outward event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Full-scale int16 used for both conversion directions
pub const PCM16_SCALE: f32 = 32767.0;

/// Level meter floor in dB
pub const LEVEL_FLOOR_DB: f32 = -80.0;

/// Guards log10 at digital silence
pub const LEVEL_EPSILON: f32 = 1e-5;
