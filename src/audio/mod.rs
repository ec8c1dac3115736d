//! # Audio Frames and Conversion
//!
//! Frame types that flow between the WebSocket transport, the wire serializer
//! and the speech-to-speech assistant, plus the PCM helpers and the stream
//! resampler they rely on.
//!
//! ## Audio Format Requirements:
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers
//! - **Sample Rate**: 16kHz on the wire by default, configurable per direction

pub mod frames;      // Frame types exchanged inside a session
pub mod pcm;         // PCM16 byte/sample conversion
pub mod resampler;   // Chunked FFT stream resampler

pub use frames::{AudioRawFrame, Frame, StartFrame};
pub use resampler::StreamResampler;

use thiserror::Error;

/// Errors produced while converting or resampling audio.
#[derive(Debug, Error)]
pub enum AudioError {
    /// PCM16 payloads must contain whole samples
    #[error("Audio data length must be even for 16-bit samples (got {0} bytes)")]
    OddLength(usize),

    /// A sample rate of zero cannot be resampled to or from
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    /// Resampler construction or processing failed
    #[error("Resampler error: {0}")]
    Resampler(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
