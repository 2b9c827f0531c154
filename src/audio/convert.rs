//! Float <-> signed 16-bit PCM conversion
//!
//! Floats are clamped to [-1.0, 1.0] and scaled by 32767 (truncating), so a
//! float -> int16 -> float round trip moves a sample by less than 1/32767.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::PCM16_SCALE;
use crate::error::AudioError;

/// Convert one normalized sample to int16
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16
}

/// Convert one int16 sample to a normalized float
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / PCM16_SCALE
}

/// Convert into a caller-owned buffer (no allocation).
/// Returns the number of samples written.
pub fn f32_to_i16_into(input: &[f32], output: &mut [i16]) -> usize {
    let count = input.len().min(output.len());
    for (dst, &src) in output[..count].iter_mut().zip(&input[..count]) {
        *dst = f32_to_i16(src);
    }
    count
}

/// Mean absolute amplitude, the unnormalized "raw level"
pub fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

/// Serialize int16 samples as little-endian bytes
pub fn i16_to_le_bytes(samples: &[i16]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.put_i16_le(sample);
    }
    out.freeze()
}

/// Decode little-endian int16 PCM into normalized floats
pub fn le_bytes_to_f32(mut bytes: &[u8]) -> Result<Vec<f32>, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::MalformedPlayback(format!(
            "odd byte length {}",
            bytes.len()
        )));
    }
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while bytes.has_remaining() {
        samples.push(i16_to_f32(bytes.get_i16_le()));
    }
    Ok(samples)
}
