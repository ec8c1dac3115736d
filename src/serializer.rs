//! # Base64 Audio Serializer
//!
//! Converts between the JSON/base64 wire format spoken by browser and test
//! clients and the session's internal audio frames.
//!
//! ## Wire format:
//! - **Server → Client (audio)**: `{"event": "media", "data": "<base64 PCM16 mono>"}`
//! - **Server → Client (barge-in)**: `{"event": "stop"}`
//! - **Client → Server**: a bare base64 PCM16 mono string, no envelope
//!
//! ## Resampling:
//! Outgoing audio is converted to `target_sample_rate` (what the client plays);
//! incoming audio is converted from `target_sample_rate` to the pipeline input
//! rate delivered in the `StartFrame`. Each direction keeps its own stream
//! resampler so chunk remainders never mix.
//!
//! Every failure is logged and reported as `None`; nothing here raises.

use crate::audio::{pcm, AudioError, AudioRawFrame, Frame, StartFrame, StreamResampler};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// Default client-side sample rate.
pub const DEFAULT_TARGET_SAMPLE_RATE: u32 = 16000;

/// Events sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ServerEvent {
    /// Base64-encoded PCM16 mono audio for playback
    Media { data: String },
    /// Drop any queued playback
    Stop,
}

/// How the transport should frame serialized output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializerType {
    Text,
}

/// Configuration parameters for [`Base64AudioSerializer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputParams {
    /// Sample rate used on the wire, in both directions
    pub target_sample_rate: u32,
    /// Optional override for the pipeline input sample rate
    pub sample_rate: Option<u32>,
}

impl Default for InputParams {
    fn default() -> Self {
        Self {
            target_sample_rate: DEFAULT_TARGET_SAMPLE_RATE,
            sample_rate: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SerializerError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializer for base64-encoded audio over a WebSocket.
pub struct Base64AudioSerializer {
    params: InputParams,
    /// Pipeline input rate, 0 until `setup` runs
    sample_rate: u32,
    input_resampler: StreamResampler,
    output_resampler: StreamResampler,
}

impl Default for Base64AudioSerializer {
    fn default() -> Self {
        Self::new(InputParams::default())
    }
}

impl Base64AudioSerializer {
    pub fn new(params: InputParams) -> Self {
        Self {
            params,
            sample_rate: 0,
            input_resampler: StreamResampler::new(),
            output_resampler: StreamResampler::new(),
        }
    }

    /// Output is JSON text.
    pub fn serializer_type(&self) -> SerializerType {
        SerializerType::Text
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.params.target_sample_rate
    }

    /// Pipeline input rate in effect (0 before `setup`).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Adopt the pipeline configuration.
    pub fn setup(&mut self, frame: &StartFrame) {
        self.sample_rate = self.params.sample_rate.unwrap_or(frame.audio_in_sample_rate);
        debug!(
            sample_rate = self.sample_rate,
            target_sample_rate = self.params.target_sample_rate,
            "Serializer configured"
        );
    }

    /// Serialize a frame for the client.
    ///
    /// ## Returns:
    /// - **Some(json)**: audio as a `media` event, interruptions as `stop`
    /// - **None**: unhandled frame type, or a failure (logged)
    pub fn serialize(&mut self, frame: &Frame) -> Option<String> {
        match self.try_serialize(frame) {
            Ok(Some(json)) => Some(json),
            Ok(None) => {
                debug!(frame = frame.name(), "Unhandled frame");
                None
            }
            Err(e) => {
                error!("Error serializing audio frame: {}", e);
                None
            }
        }
    }

    /// Deserialize client text (or UTF-8 bytes) into an input audio frame.
    ///
    /// ## Process:
    /// 1. Decode the base64 payload
    /// 2. Interpret the bytes as PCM16 little-endian samples
    /// 3. Resample from the wire rate to the pipeline rate if they differ
    /// 4. Wrap the result in a mono frame at the pipeline rate
    pub fn deserialize(&mut self, data: impl AsRef<[u8]>) -> Option<AudioRawFrame> {
        match self.try_deserialize(data.as_ref()) {
            // Empty payloads, or input still held by the resampler
            Ok(frame) if frame.audio.is_empty() => {
                debug!("No audio to forward");
                None
            }
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("Error deserializing audio data: {}", e);
                None
            }
        }
    }

    fn try_serialize(&mut self, frame: &Frame) -> Result<Option<String>, SerializerError> {
        let event = match frame {
            Frame::StartInterruption => ServerEvent::Stop,
            Frame::OutputAudio(audio) | Frame::InputAudio(audio) => {
                let target = self.params.target_sample_rate;
                let payload = if audio.sample_rate != target {
                    let samples = pcm::bytes_to_samples(&audio.audio)?;
                    let resampled = self
                        .output_resampler
                        .resample(&samples, audio.sample_rate, target)?;
                    pcm::samples_to_bytes(&resampled)
                } else {
                    audio.audio.clone()
                };

                ServerEvent::Media {
                    data: STANDARD.encode(payload),
                }
            }
            Frame::Start(_) | Frame::End => return Ok(None),
        };

        Ok(Some(serde_json::to_string(&event)?))
    }

    fn try_deserialize(&mut self, data: &[u8]) -> Result<AudioRawFrame, SerializerError> {
        let text = std::str::from_utf8(data)?;
        let decoded = STANDARD.decode(text.trim())?;
        let samples = pcm::bytes_to_samples(&decoded)?;

        let target = self.params.target_sample_rate;
        let audio = if target != self.sample_rate {
            let resampled = self
                .input_resampler
                .resample(&samples, target, self.sample_rate)?;
            pcm::samples_to_bytes(&resampled)
        } else {
            decoded
        };

        Ok(AudioRawFrame::mono(audio, self.sample_rate))
    }
}
