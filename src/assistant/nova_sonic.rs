//! Amazon Nova Sonic over the Bedrock bidirectional streaming API.
//!
//! One `connect` opens one stream. Session inputs are turned into protocol
//! events by an `async_stream` generator that owns the input receiver; a
//! spawned task reads the output stream and forwards parsed events.

use super::credentials::{self, StaticCredentials};
use super::events::{NovaProtocol, OutputParser};
use super::{
    AssistantError, AssistantEvent, AssistantSession, SessionInput, SessionSetup,
    SpeechToSpeechService,
};
use crate::config::{AppConfig, CredentialsConfig};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_bedrockruntime::types::error::InvokeModelWithBidirectionalStreamInputError;
use aws_sdk_bedrockruntime::types::{
    BidirectionalInputPayloadPart, InvokeModelWithBidirectionalStreamInput,
    InvokeModelWithBidirectionalStreamOutput as OutputEvent,
};
use aws_sdk_bedrockruntime::Client;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::Blob;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const CREDENTIALS_PROVIDER_NAME: &str = "container-metadata";

/// Nova Sonic session factory.
#[derive(Debug, Clone)]
pub struct NovaSonicService {
    region: String,
    model_id: String,
    credentials: CredentialsConfig,
    channel_capacity: usize,
}

impl NovaSonicService {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            region: config.assistant.region.clone(),
            model_id: config.assistant.model_id.clone(),
            credentials: config.credentials.clone(),
            channel_capacity: config.audio.input_queue_capacity,
        }
    }

    /// SDK config with freshly resolved credentials.
    async fn sdk_config(&self) -> SdkConfig {
        let loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()));

        match credentials::resolve(&self.credentials).await {
            Some(StaticCredentials {
                access_key_id,
                secret_access_key,
                session_token,
            }) => {
                let provider = Credentials::new(
                    access_key_id,
                    secret_access_key,
                    session_token,
                    None,
                    CREDENTIALS_PROVIDER_NAME,
                );
                loader.credentials_provider(provider).load().await
            }
            None => {
                debug!("Using the default AWS credential chain");
                loader.load().await
            }
        }
    }
}

#[async_trait]
impl SpeechToSpeechService for NovaSonicService {
    async fn connect(&self, setup: SessionSetup) -> Result<AssistantSession, AssistantError> {
        let client = Client::new(&self.sdk_config().await);
        let (input_tx, input_rx) = mpsc::channel(self.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(self.channel_capacity);

        let protocol = NovaProtocol::new();
        let stream = input_stream(protocol, &setup, input_rx);

        let output = client
            .invoke_model_with_bidirectional_stream()
            .model_id(&self.model_id)
            .body(stream.into())
            .send()
            .await
            .map_err(|e| AssistantError::Connection(DisplayErrorContext(&e).to_string()))?;

        info!(model_id = %self.model_id, region = %self.region, "Speech session started");

        let mut parser = OutputParser::new(setup.output_sample_rate);
        let mut body = output.body;
        tokio::spawn(async move {
            loop {
                match body.recv().await {
                    Ok(Some(OutputEvent::Chunk(part))) => {
                        let Some(bytes) = part.bytes() else {
                            continue;
                        };
                        let parsed = match parser.parse(bytes.as_ref()) {
                            Ok(parsed) => parsed,
                            Err(e) => {
                                warn!("Skipping speech service event: {}", e);
                                continue;
                            }
                        };
                        for event in parsed {
                            if event_tx.send(event).await.is_err() {
                                debug!("Session receiver dropped, stopping output reader");
                                return;
                            }
                        }
                    }
                    Ok(Some(other)) => debug!("Ignoring stream event: {:?}", other),
                    Ok(None) => {
                        info!("Speech session stream ended");
                        let _ = event_tx.send(AssistantEvent::Ended).await;
                        break;
                    }
                    Err(e) => {
                        let message = DisplayErrorContext(&e).to_string();
                        error!("Speech session stream error: {}", message);
                        let _ = event_tx.send(AssistantEvent::Error(message)).await;
                        break;
                    }
                }
            }
        });

        Ok(AssistantSession {
            input: input_tx,
            events: event_rx,
        })
    }
}

/// Protocol events for the whole session: opening, inputs, closing.
fn input_stream(
    protocol: NovaProtocol,
    setup: &SessionSetup,
    mut input_rx: mpsc::Receiver<SessionInput>,
) -> impl Stream<
    Item = Result<InvokeModelWithBidirectionalStreamInput, InvokeModelWithBidirectionalStreamInputError>,
> + Send
       + Sync
       + 'static {
    let opening = protocol.opening(setup);

    async_stream::stream! {
        for event in opening {
            yield Ok(chunk(&event));
        }

        while let Some(input) = input_rx.recv().await {
            let events = match input {
                SessionInput::Audio(frame) => vec![protocol.audio_input(&frame.audio)],
                SessionInput::ToolResult { tool_use_id, content } => {
                    protocol.tool_result(&tool_use_id, &content)
                }
                SessionInput::TriggerResponse => protocol.trigger(),
                SessionInput::Close => break,
            };
            for event in events {
                yield Ok(chunk(&event));
            }
        }

        debug!(prompt = protocol.prompt_name(), "Closing speech session input");
        for event in protocol.closing() {
            yield Ok(chunk(&event));
        }
    }
}

fn chunk(event: &Value) -> InvokeModelWithBidirectionalStreamInput {
    InvokeModelWithBidirectionalStreamInput::Chunk(
        BidirectionalInputPayloadPart::builder()
            .bytes(Blob::new(event.to_string()))
            .build(),
    )
}
