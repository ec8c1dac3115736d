//! # Stream Resampler
//!
//! Sample-rate conversion for audio that arrives in arbitrary-sized pieces.
//!
//! ## How it works:
//! - Uses rubato's `FftFixedInOut`, whose input and output chunk sizes are in
//!   an exact `from:to` ratio
//! - Samples that don't fill a whole chunk are held back and prepended to the
//!   next call, so output length tracks `input * to / from` over the stream
//! - A change of rate pair rebuilds the resampler and drops held samples

use super::{pcm, AudioError, AudioResult};
use rubato::{FftFixedInOut, Resampler};
use tracing::debug;

/// Requested input chunk length: 20ms of audio at the source rate.
const CHUNK_DURATION_DIVISOR: u32 = 50;

struct ResamplerState {
    from_rate: u32,
    to_rate: u32,
    resampler: FftFixedInOut<f32>,
    pending: Vec<f32>,
}

impl ResamplerState {
    fn new(from_rate: u32, to_rate: u32) -> AudioResult<Self> {
        let chunk_size = (from_rate / CHUNK_DURATION_DIVISOR).max(1) as usize;
        let resampler = FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, chunk_size, 1)
            .map_err(|e| AudioError::Resampler(e.to_string()))?;

        debug!(
            from_rate,
            to_rate,
            chunk_in = resampler.input_frames_next(),
            chunk_out = resampler.output_frames_next(),
            "Created stream resampler"
        );

        Ok(Self {
            from_rate,
            to_rate,
            resampler,
            pending: Vec::new(),
        })
    }
}

/// Stateful resampler for one direction of a stream.
#[derive(Default)]
pub struct StreamResampler {
    state: Option<ResamplerState>,
}

impl StreamResampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resample a block of PCM16 samples from `from_rate` to `to_rate`.
    ///
    /// Returns the input untouched when the rates match. Otherwise returns
    /// every whole chunk that is now available; leftover samples wait for
    /// the next call.
    pub fn resample(&mut self, samples: &[i16], from_rate: u32, to_rate: u32) -> AudioResult<Vec<i16>> {
        if from_rate == 0 {
            return Err(AudioError::InvalidSampleRate(from_rate));
        }
        if to_rate == 0 {
            return Err(AudioError::InvalidSampleRate(to_rate));
        }
        if from_rate == to_rate {
            return Ok(samples.to_vec());
        }

        let state = self.state_for(from_rate, to_rate)?;
        state.pending.extend(pcm::to_float(samples));

        let mut output = Vec::new();
        loop {
            let needed = state.resampler.input_frames_next();
            if state.pending.len() < needed {
                break;
            }

            let chunk: Vec<f32> = state.pending.drain(..needed).collect();
            let processed = state
                .resampler
                .process(&[chunk], None)
                .map_err(|e| AudioError::Resampler(e.to_string()))?;

            if let Some(channel) = processed.into_iter().next() {
                output.extend(channel);
            }
        }

        Ok(pcm::from_float(&output))
    }

    /// Samples waiting for a complete chunk.
    pub fn pending_len(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.pending.len())
    }

    fn state_for(&mut self, from_rate: u32, to_rate: u32) -> AudioResult<&mut ResamplerState> {
        let reusable = matches!(
            &self.state,
            Some(state) if state.from_rate == from_rate && state.to_rate == to_rate
        );
        if !reusable {
            self.state = Some(ResamplerState::new(from_rate, to_rate)?);
        }

        self.state
            .as_mut()
            .ok_or_else(|| AudioError::Resampler("resampler state missing".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, rate: u32) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f32 / rate as f32;
                ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16
            })
            .collect()
    }

    #[test]
    fn test_same_rate_is_passthrough() {
        let mut resampler = StreamResampler::new();
        let input = sine(100, 16000);
        assert_eq!(resampler.resample(&input, 16000, 16000).unwrap(), input);
        assert_eq!(resampler.pending_len(), 0);
    }

    #[test]
    fn test_downsample_halves_length() {
        let mut resampler = StreamResampler::new();
        // 200ms at 16kHz
        let output = resampler.resample(&sine(3200, 16000), 16000, 8000).unwrap();
        assert_eq!(output.len(), 1600);
        assert_eq!(resampler.pending_len(), 0);
    }

    #[test]
    fn test_upsample_doubles_length() {
        let mut resampler = StreamResampler::new();
        let output = resampler.resample(&sine(1600, 8000), 8000, 16000).unwrap();
        assert_eq!(output.len(), 3200);
    }

    #[test]
    fn test_partial_chunks_are_carried_over() {
        let mut resampler = StreamResampler::new();
        let first = resampler.resample(&sine(10, 16000), 16000, 8000).unwrap();
        assert!(first.is_empty());
        assert_eq!(resampler.pending_len(), 10);

        let second = resampler.resample(&sine(3190, 16000), 16000, 8000).unwrap();
        assert_eq!(first.len() + second.len(), 1600);
        assert_eq!(resampler.pending_len(), 0);
    }

    #[test]
    fn test_rate_change_rebuilds() {
        let mut resampler = StreamResampler::new();
        resampler.resample(&sine(10, 16000), 16000, 8000).unwrap();
        assert_eq!(resampler.pending_len(), 10);

        let output = resampler.resample(&sine(1440, 24000), 24000, 16000).unwrap();
        assert_eq!(output.len(), 960);
        assert_eq!(resampler.pending_len(), 0);
    }

    #[test]
    fn test_zero_rate_is_an_error() {
        let mut resampler = StreamResampler::new();
        assert!(matches!(
            resampler.resample(&[0, 0], 0, 16000),
            Err(AudioError::InvalidSampleRate(0))
        ));
        assert!(resampler.resample(&[0, 0], 16000, 0).is_err());
    }
}
