//! Conversation transcript collected from the assistant's text output.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use tracing::info;

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Parse the role names used by the speech service (`USER`, `ASSISTANT`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "USER" => Some(Role::User),
            "ASSISTANT" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub content: String,
    /// RFC 3339, UTC
    pub timestamp: String,
}

/// Accumulates the final utterances of one session and logs each one.
#[derive(Debug, Default)]
pub struct TranscriptProcessor {
    messages: Vec<TranscriptMessage>,
}

impl TranscriptProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an utterance.
    ///
    /// Speculative (non-final) and blank text is ignored; returns the stored
    /// message otherwise.
    pub fn push(&mut self, role: Role, content: &str, is_final: bool) -> Option<&TranscriptMessage> {
        let content = content.trim();
        if !is_final || content.is_empty() {
            return None;
        }

        let message = TranscriptMessage {
            role,
            content: content.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        info!("Transcript: [{}] {}: {}", message.timestamp, message.role, message.content);

        self.messages.push(message);
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
