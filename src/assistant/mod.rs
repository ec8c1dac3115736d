//! # Speech-to-Speech Assistant
//!
//! The seam between a WebSocket session and the managed speech-to-speech
//! model. Voice activity detection, turn-taking and barge-in detection all
//! happen inside the service; this side only streams audio in, relays what
//! comes back, and answers tool calls.
//!
//! ## Session lifecycle:
//! 1. `SpeechToSpeechService::connect` opens a session from a `SessionSetup`
//! 2. The caller pushes `SessionInput`s through `AssistantSession::input`
//! 3. The service reports `AssistantEvent`s through `AssistantSession::events`
//! 4. `SessionInput::Close` (or dropping the sender) ends the session

pub mod credentials; // Container credential refresh
pub mod events;      // Event protocol builders and output parser
pub mod nova_sonic;  // Bedrock bidirectional stream client

#[cfg(test)]
pub mod scripted;    // In-memory service for tests

pub use nova_sonic::NovaSonicService;

use crate::audio::AudioRawFrame;
use crate::config::AppConfig;
use crate::tools::{ToolRegistry, ToolsSchema};
use crate::transcript::Role;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;

/// Appended to the system prompt so the assistant waits for the trigger.
pub const AWAIT_TRIGGER_INSTRUCTION: &str = "Start speaking when you hear the user say 'ready', but don't consider that 'ready' to be a meaningful part of the conversation other than as a trigger for you to start speaking.";

/// Text sent as user input to make the assistant speak first.
pub const TRIGGER_TEXT: &str = "ready";

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Failed to read system prompt {path}: {source}")]
    Prompt {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to the speech service: {0}")]
    Connection(String),

    #[error("Unexpected event from the speech service: {0}")]
    Protocol(String),

    #[error("Credential refresh failed: {0}")]
    Credentials(String),
}

impl From<serde_json::Error> for AssistantError {
    fn from(err: serde_json::Error) -> Self {
        AssistantError::Protocol(err.to_string())
    }
}

/// Everything the service needs to open a session.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub system_instruction: String,
    pub tools: ToolsSchema,
    pub voice_id: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

impl SessionSetup {
    /// Build the setup for one connection.
    ///
    /// The system prompt is re-read from disk each time so edits apply to
    /// the next session without a restart.
    pub fn from_config(config: &AppConfig, tools: &ToolRegistry) -> Result<Self, AssistantError> {
        let prompt = read_prompt(&config.assistant.prompt_path)?;

        Ok(Self {
            system_instruction: system_instruction(&prompt),
            tools: tools.schemas(),
            voice_id: config.assistant.voice_id.clone(),
            input_sample_rate: config.audio.sample_rate,
            output_sample_rate: config.audio.output_sample_rate,
            max_tokens: config.assistant.max_tokens,
            top_p: config.assistant.top_p,
            temperature: config.assistant.temperature,
        })
    }
}

fn read_prompt(path: &Path) -> Result<String, AssistantError> {
    std::fs::read_to_string(path).map_err(|source| AssistantError::Prompt {
        path: path.display().to_string(),
        source,
    })
}

/// Prompt text followed by the await-trigger instruction.
pub fn system_instruction(prompt: &str) -> String {
    format!("{}\n{}", prompt, AWAIT_TRIGGER_INSTRUCTION)
}

/// Input pushed into an open session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// User audio at the session's input rate
    Audio(AudioRawFrame),
    /// Answer to an earlier `AssistantEvent::ToolCall`
    ToolResult { tool_use_id: String, content: Value },
    /// Make the assistant start speaking
    TriggerResponse,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool_use_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Output reported by an open session.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantEvent {
    /// Assistant speech at the session's output rate
    Audio(AudioRawFrame),
    /// The user barged in; queued playback should be dropped
    Interrupted,
    Text {
        role: Role,
        content: String,
        is_final: bool,
    },
    ToolCall(ToolCall),
    Ended,
    Error(String),
}

/// Handle to an open session.
pub struct AssistantSession {
    pub input: mpsc::Sender<SessionInput>,
    pub events: mpsc::Receiver<AssistantEvent>,
}

/// A managed speech-to-speech model.
#[async_trait]
pub trait SpeechToSpeechService: Send + Sync {
    async fn connect(&self, setup: SessionSetup) -> Result<AssistantSession, AssistantError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_system_instruction_appends_trigger() {
        let instruction = system_instruction("You are a banking assistant.");
        assert_eq!(
            instruction,
            format!("You are a banking assistant.\n{}", AWAIT_TRIGGER_INSTRUCTION)
        );
    }

    #[test]
    fn test_setup_from_config() {
        let mut prompt = tempfile::NamedTempFile::new().unwrap();
        write!(prompt, "Be helpful.").unwrap();

        let mut config = AppConfig::default();
        config.assistant.prompt_path = prompt.path().to_path_buf();
        config.assistant.voice_id = "matthew".to_string();
        config.audio.output_sample_rate = 24000;

        let setup = SessionSetup::from_config(&config, &ToolRegistry::banking()).unwrap();
        assert!(setup.system_instruction.starts_with("Be helpful.\n"));
        assert!(setup.system_instruction.ends_with(AWAIT_TRIGGER_INSTRUCTION));
        assert_eq!(setup.voice_id, "matthew");
        assert_eq!(setup.input_sample_rate, 16000);
        assert_eq!(setup.output_sample_rate, 24000);
        assert_eq!(setup.tools.standard_tools[0].name, "get_balance");
    }

    #[test]
    fn test_missing_prompt_file() {
        let mut config = AppConfig::default();
        config.assistant.prompt_path = "/nonexistent/prompt.txt".into();

        let err = SessionSetup::from_config(&config, &ToolRegistry::new()).unwrap_err();
        assert!(matches!(err, AssistantError::Prompt { .. }));
    }
}
