//! Frame types exchanged between the transport, the serializer and the assistant.

/// Raw PCM16 little-endian audio with its format.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioRawFrame {
    /// Interleaved PCM16 little-endian bytes
    pub audio: Vec<u8>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (always 1 on this service)
    pub num_channels: u16,
}

impl AudioRawFrame {
    /// Create a mono frame.
    pub fn mono(audio: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            audio,
            sample_rate,
            num_channels: 1,
        }
    }

    /// Number of samples per channel.
    pub fn num_frames(&self) -> usize {
        let channels = self.num_channels.max(1) as usize;
        self.audio.len() / 2 / channels
    }
}

/// Pipeline configuration handed to serializers before any audio flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartFrame {
    pub audio_in_sample_rate: u32,
    pub audio_out_sample_rate: u32,
}

/// Everything the serializer can be asked to put on (or take off) the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Session start carrying the pipeline sample rates
    Start(StartFrame),
    /// Audio received from the client
    InputAudio(AudioRawFrame),
    /// Audio produced by the assistant
    OutputAudio(AudioRawFrame),
    /// The user barged in; the client must drop queued playback
    StartInterruption,
    /// Session end
    End,
}

impl Frame {
    /// Name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Start(_) => "StartFrame",
            Frame::InputAudio(_) => "InputAudioRawFrame",
            Frame::OutputAudio(_) => "OutputAudioRawFrame",
            Frame::StartInterruption => "StartInterruptionFrame",
            Frame::End => "EndFrame",
        }
    }
}
