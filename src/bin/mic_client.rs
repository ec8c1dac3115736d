//! Manual test client for the voice endpoint.
//!
//! Streams a WAV file as if it were a microphone (PCM16 mono 16 kHz, 30 ms
//! chunks at real-time pace, silence once the file runs out), plays the
//! assistant's replies into an in-memory buffer and writes what was played
//! to a WAV file when the session ends or Ctrl+C is pressed.
//!
//! ```text
//! mic-client --input question.wav --output reply.wav
//! ```

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
    Message,
};
use tracing::{debug, error, info, warn};

use virtual_banking_assistant::audio::{pcm, StreamResampler};
use virtual_banking_assistant::config::AppConfig;
use virtual_banking_assistant::serializer::ServerEvent;

const SAMPLE_RATE: u32 = 16000;
/// 30 ms at 16 kHz
const CHUNK_SAMPLES: usize = 480;
const CHUNK_INTERVAL: Duration = Duration::from_millis(30);

#[derive(Parser, Debug)]
#[command(name = "mic-client", about = "Talk to the Virtual Banking Assistant from a WAV file")]
struct Args {
    #[arg(short, long, default_value = "ws://localhost:8000/ws")]
    url: String,

    /// Defaults to the api key from config.toml / APP_AUTH__API_KEY
    #[arg(short = 'k', long)]
    api_key: Option<String>,

    /// Audio to speak; any PCM or float WAV, mixed down and resampled to 16 kHz mono
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Where the played-back assistant audio is written
    #[arg(short, long, default_value = "assistant_reply.wav")]
    output: PathBuf,
}

/// Audio the assistant sent but the "speaker" has not played yet.
#[derive(Debug, Default)]
struct Playback {
    pending: VecDeque<i16>,
    played: Vec<i16>,
}

impl Playback {
    fn enqueue(&mut self, samples: &[i16]) {
        self.pending.extend(samples.iter().copied());
    }

    /// Barge-in: drop everything not yet played. Returns the number of samples dropped.
    fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Play up to `samples` samples.
    fn advance(&mut self, samples: usize) {
        let n = samples.min(self.pending.len());
        self.played.extend(self.pending.drain(..n));
    }

    /// Flush the remaining queue and hand back everything played.
    fn finish(mut self) -> Vec<i16> {
        let remaining = self.pending.len();
        self.advance(remaining);
        self.played
    }
}

/// Microphone stand-in: the file, then silence forever.
struct Microphone {
    samples: Vec<i16>,
    position: usize,
}

impl Microphone {
    fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            position: 0,
        }
    }

    fn next_chunk(&mut self) -> Vec<i16> {
        let end = (self.position + CHUNK_SAMPLES).min(self.samples.len());
        let mut chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        chunk.resize(CHUNK_SAMPLES, 0);
        chunk
    }

    fn exhausted(&self) -> bool {
        self.position >= self.samples.len()
    }
}

fn to_i16(data: wav::BitDepth) -> Result<Vec<i16>> {
    Ok(match data {
        wav::BitDepth::Eight(samples) => samples.into_iter().map(|s| (s as i16 - 128) << 8).collect(),
        wav::BitDepth::Sixteen(samples) => samples,
        wav::BitDepth::TwentyFour(samples) => samples.into_iter().map(|s| (s >> 8) as i16).collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => pcm::from_float(&samples),
        wav::BitDepth::Empty => bail!("WAV file has no samples"),
    })
}

/// Keep the first channel of interleaved audio.
fn first_channel(samples: Vec<i16>, channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples;
    }
    samples.into_iter().step_by(channels as usize).collect()
}

fn read_input(path: &Path) -> Result<Vec<i16>> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let (header, data) = wav::read(&mut file).with_context(|| format!("reading {}", path.display()))?;

    let mono = first_channel(to_i16(data)?, header.channel_count);
    info!(
        channels = header.channel_count,
        sample_rate = header.sampling_rate,
        samples = mono.len(),
        "Loaded {}",
        path.display()
    );

    if header.sampling_rate == SAMPLE_RATE {
        return Ok(mono);
    }
    let mut resampler = StreamResampler::new();
    Ok(resampler.resample(&mono, header.sampling_rate, SAMPLE_RATE)?)
}

fn write_output(path: &Path, samples: Vec<i16>) -> Result<()> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, SAMPLE_RATE, 16);
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    wav::write(header, &wav::BitDepth::Sixteen(samples), &mut file)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn handle_server_text(text: &str, playback: &mut Playback) {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(ServerEvent::Media { data }) => {
            let samples = STANDARD
                .decode(data.as_bytes())
                .map_err(anyhow::Error::from)
                .and_then(|bytes| Ok(pcm::bytes_to_samples(&bytes)?));
            match samples {
                Ok(samples) => playback.enqueue(&samples),
                Err(e) => warn!("Dropping undecodable media event: {}", e),
            }
        }
        Ok(ServerEvent::Stop) => {
            let dropped = playback.clear();
            info!("Assistant interrupted, dropped {} queued samples", dropped);
        }
        Err(e) => debug!("Ignoring unrecognized message ({}): {}", e, text),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mic_client=info".into()),
        )
        .init();

    let args = Args::parse();

    let api_key = match args.api_key {
        Some(key) => key,
        None => AppConfig::load()
            .map(|config| config.auth.api_key)
            .unwrap_or_else(|_| AppConfig::default().auth.api_key),
    };

    let samples = match &args.input {
        Some(path) => read_input(path)?,
        None => {
            info!("No input file, streaming silence");
            Vec::new()
        }
    };
    let mut microphone = Microphone::new(samples);

    let mut request = args.url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(&api_key)?);

    let (socket, response) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("connecting to {}", args.url))?;
    info!("Connected to {} ({})", args.url, response.status());
    let (mut write, mut read) = socket.split();

    let mut playback = Playback::default();
    let mut ticker = tokio::time::interval(CHUNK_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut announced_silence = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl+C received, closing");
                break;
            }
            _ = ticker.tick() => {
                let chunk = microphone.next_chunk();
                let payload = STANDARD.encode(pcm::samples_to_bytes(&chunk));
                if let Err(e) = write.send(Message::Text(payload)).await {
                    error!("Send failed: {}", e);
                    break;
                }
                if microphone.exhausted() && !announced_silence {
                    info!("Input finished, sending silence until Ctrl+C");
                    announced_silence = true;
                }
                playback.advance(CHUNK_SAMPLES);
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => handle_server_text(&text, &mut playback),
                Some(Ok(Message::Close(frame))) => {
                    info!("Server closed the session: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Receive failed: {}", e);
                    break;
                }
                None => break,
            }
        }
    }

    if let Err(e) = write.send(Message::Close(None)).await {
        debug!("Close frame not sent: {}", e);
    }

    let played = playback.finish();
    let seconds = played.len() as f64 / SAMPLE_RATE as f64;
    write_output(&args.output, played)?;
    info!("Wrote {:.1}s of assistant audio to {}", seconds, args.output.display());

    Ok(())
}
