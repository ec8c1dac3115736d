//! # PCM16 Conversion
//!
//! Converts between the little-endian byte buffers carried on the wire and
//! the sample representations the resampler works with.
//!
//! ## Conversion ranges:
//! - **i16**: [-32768, 32767]
//! - **f32**: [-1.0, 1.0], clamped on the way back to avoid wrap-around

use super::{AudioError, AudioResult};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Decode little-endian PCM16 bytes into samples.
///
/// ## Returns:
/// - **Ok(Vec<i16>)**: One entry per 16-bit sample
/// - **Err(AudioError::OddLength)**: The buffer does not hold whole samples
pub fn bytes_to_samples(data: &[u8]) -> AudioResult<Vec<i16>> {
    if data.len() % 2 != 0 {
        return Err(AudioError::OddLength(data.len()));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

/// Encode samples as little-endian PCM16 bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}

/// Scale 16-bit samples into [-1.0, 1.0].
pub fn to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Scale float samples back to 16-bit, clamping out-of-range values.
pub fn from_float(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let scaled = (sample * 32768.0).round();
            scaled.clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}
