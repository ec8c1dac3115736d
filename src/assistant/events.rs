//! # Nova Sonic Event Protocol
//!
//! Every message on the bidirectional stream is a JSON object of the form
//! `{"event": {"<name>": {...}}}`.
//!
//! ## Input sequence:
//! ```text
//! sessionStart → promptStart → system text block → user audio block (open)
//!     audioInput*  |  trigger text block  |  tool result block
//! audio contentEnd → promptEnd → sessionEnd
//! ```
//!
//! ## Output events handled:
//! - `contentStart`: remembers role and generation stage of the block
//! - `textOutput` / `audioOutput`
//! - `toolUse`: held until its block's `contentEnd`, then reported
//! - `contentEnd` with `stopReason: INTERRUPTED`
//! - `completionEnd`

use super::{AssistantError, AssistantEvent, SessionSetup, ToolCall, TRIGGER_TEXT};
use crate::audio::AudioRawFrame;
use crate::transcript::Role;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Text the model emits in place of speech when the user barges in.
const INTERRUPTED_MARKER: &str = "{ \"interrupted\" : true }";

/// Builds input events for one prompt.
///
/// Content names must be unique within a prompt, so every block other than
/// the long-lived user audio block gets a fresh UUID.
#[derive(Debug, Clone)]
pub struct NovaProtocol {
    prompt_name: String,
    audio_content_name: String,
}

impl Default for NovaProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl NovaProtocol {
    pub fn new() -> Self {
        Self {
            prompt_name: Uuid::new_v4().to_string(),
            audio_content_name: Uuid::new_v4().to_string(),
        }
    }

    pub fn prompt_name(&self) -> &str {
        &self.prompt_name
    }

    /// Everything sent before the first audio chunk.
    pub fn opening(&self, setup: &SessionSetup) -> Vec<Value> {
        let mut events = vec![session_start(setup), self.prompt_start(setup)];
        events.extend(self.text_block("SYSTEM", &setup.system_instruction, false));
        events.push(self.audio_content_start(setup.input_sample_rate));
        events
    }

    /// Everything sent to end the session cleanly.
    pub fn closing(&self) -> Vec<Value> {
        vec![
            self.content_end(&self.audio_content_name),
            event("promptEnd", json!({ "promptName": self.prompt_name })),
            event("sessionEnd", json!({})),
        ]
    }

    /// Interactive user text that makes the assistant speak first.
    pub fn trigger(&self) -> Vec<Value> {
        self.text_block("USER", TRIGGER_TEXT, true)
    }

    /// One chunk of PCM16 user audio.
    pub fn audio_input(&self, pcm: &[u8]) -> Value {
        event(
            "audioInput",
            json!({
                "promptName": self.prompt_name,
                "contentName": self.audio_content_name,
                "content": STANDARD.encode(pcm),
            }),
        )
    }

    /// The result of a tool call, as its own content block.
    pub fn tool_result(&self, tool_use_id: &str, content: &Value) -> Vec<Value> {
        let content_name = Uuid::new_v4().to_string();
        vec![
            event(
                "contentStart",
                json!({
                    "promptName": self.prompt_name,
                    "contentName": content_name,
                    "interactive": false,
                    "type": "TOOL",
                    "role": "TOOL",
                    "toolResultInputConfiguration": {
                        "toolUseId": tool_use_id,
                        "type": "TEXT",
                        "textInputConfiguration": { "mediaType": "text/plain" }
                    }
                }),
            ),
            event(
                "toolResult",
                json!({
                    "promptName": self.prompt_name,
                    "contentName": content_name,
                    "content": content.to_string(),
                }),
            ),
            self.content_end(&content_name),
        ]
    }

    fn prompt_start(&self, setup: &SessionSetup) -> Value {
        let tools: Vec<Value> = setup
            .tools
            .standard_tools
            .iter()
            .map(|tool| {
                json!({
                    "toolSpec": {
                        "name": tool.name,
                        "description": tool.description,
                        "inputSchema": { "json": tool.input_schema().to_string() }
                    }
                })
            })
            .collect();

        event(
            "promptStart",
            json!({
                "promptName": self.prompt_name,
                "textOutputConfiguration": { "mediaType": "text/plain" },
                "audioOutputConfiguration": {
                    "mediaType": "audio/lpcm",
                    "sampleRateHertz": setup.output_sample_rate,
                    "sampleSizeBits": 16,
                    "channelCount": 1,
                    "voiceId": setup.voice_id,
                    "encoding": "base64",
                    "audioType": "SPEECH"
                },
                "toolUseOutputConfiguration": { "mediaType": "application/json" },
                "toolConfiguration": { "tools": tools }
            }),
        )
    }

    fn text_block(&self, role: &str, text: &str, interactive: bool) -> Vec<Value> {
        let content_name = Uuid::new_v4().to_string();
        vec![
            event(
                "contentStart",
                json!({
                    "promptName": self.prompt_name,
                    "contentName": content_name,
                    "type": "TEXT",
                    "interactive": interactive,
                    "role": role,
                    "textInputConfiguration": { "mediaType": "text/plain" }
                }),
            ),
            event(
                "textInput",
                json!({
                    "promptName": self.prompt_name,
                    "contentName": content_name,
                    "content": text,
                }),
            ),
            self.content_end(&content_name),
        ]
    }

    fn audio_content_start(&self, sample_rate: u32) -> Value {
        event(
            "contentStart",
            json!({
                "promptName": self.prompt_name,
                "contentName": self.audio_content_name,
                "type": "AUDIO",
                "interactive": true,
                "role": "USER",
                "audioInputConfiguration": {
                    "mediaType": "audio/lpcm",
                    "sampleRateHertz": sample_rate,
                    "sampleSizeBits": 16,
                    "channelCount": 1,
                    "audioType": "SPEECH",
                    "encoding": "base64"
                }
            }),
        )
    }

    fn content_end(&self, content_name: &str) -> Value {
        event(
            "contentEnd",
            json!({
                "promptName": self.prompt_name,
                "contentName": content_name,
            }),
        )
    }
}

fn session_start(setup: &SessionSetup) -> Value {
    event(
        "sessionStart",
        json!({
            "inferenceConfiguration": {
                "maxTokens": setup.max_tokens,
                "topP": setup.top_p,
                "temperature": setup.temperature,
            }
        }),
    )
}

fn event(name: &str, body: Value) -> Value {
    let mut inner = Map::new();
    inner.insert(name.to_string(), body);
    json!({ "event": inner })
}

#[derive(Debug, Clone)]
struct ContentBlock {
    role: Option<Role>,
    is_final: bool,
    interrupted: bool,
    /// Held until the tool block ends
    tool_call: Option<ToolCall>,
}

impl ContentBlock {
    fn unknown() -> Self {
        Self {
            role: None,
            is_final: false,
            interrupted: false,
            tool_call: None,
        }
    }
}

/// Turns output events into `AssistantEvent`s.
///
/// Keeps per-block state so speculative text can be told apart from final
/// text and an interruption is reported at most once per block.
#[derive(Debug)]
pub struct OutputParser {
    output_sample_rate: u32,
    blocks: HashMap<String, ContentBlock>,
    current: Option<String>,
}

impl OutputParser {
    pub fn new(output_sample_rate: u32) -> Self {
        Self {
            output_sample_rate,
            blocks: HashMap::new(),
            current: None,
        }
    }

    /// Parse one raw event payload.
    pub fn parse(&mut self, payload: &[u8]) -> Result<Vec<AssistantEvent>, AssistantError> {
        let value: Value = serde_json::from_slice(payload)?;
        let Some(body) = value.get("event").and_then(Value::as_object) else {
            return Err(AssistantError::Protocol("missing \"event\" object".to_string()));
        };

        let mut events = Vec::new();
        for (name, data) in body {
            if let Some(event) = self.handle(name, data)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn handle(&mut self, name: &str, data: &Value) -> Result<Option<AssistantEvent>, AssistantError> {
        match name {
            "contentStart" => {
                self.content_start(data);
                Ok(None)
            }
            "textOutput" => Ok(self.text_output(data)),
            "audioOutput" => {
                let content = data["content"].as_str().unwrap_or_default();
                let audio = STANDARD
                    .decode(content)
                    .map_err(|e| AssistantError::Protocol(format!("audioOutput: {}", e)))?;
                Ok(Some(AssistantEvent::Audio(AudioRawFrame::mono(
                    audio,
                    self.output_sample_rate,
                ))))
            }
            "toolUse" => {
                self.tool_use(data);
                Ok(None)
            }
            "contentEnd" => Ok(self.content_end(data)),
            "completionEnd" => Ok(Some(AssistantEvent::Ended)),
            other => {
                debug!(event = other, "Ignoring speech service event");
                Ok(None)
            }
        }
    }

    fn content_start(&mut self, data: &Value) {
        let id = content_id(data).unwrap_or_default();
        let stage = data["additionalModelFields"]
            .as_str()
            .and_then(|fields| serde_json::from_str::<Value>(fields).ok())
            .and_then(|fields| fields["generationStage"].as_str().map(str::to_string));

        let block = ContentBlock {
            role: data["role"].as_str().and_then(Role::parse),
            is_final: stage.as_deref() == Some("FINAL"),
            interrupted: false,
            tool_call: None,
        };
        self.blocks.insert(id.clone(), block);
        self.current = Some(id);
    }

    fn text_output(&mut self, data: &Value) -> Option<AssistantEvent> {
        let content = data["content"].as_str().unwrap_or_default();
        let id = content_id(data).or_else(|| self.current.clone()).unwrap_or_default();
        let block = self.blocks.entry(id).or_insert_with(ContentBlock::unknown);

        let role = data["role"]
            .as_str()
            .and_then(Role::parse)
            .or(block.role)
            .unwrap_or(Role::Assistant);

        if role == Role::Assistant && content.trim() == INTERRUPTED_MARKER {
            return mark_interrupted(block);
        }

        Some(AssistantEvent::Text {
            role,
            content: content.to_string(),
            is_final: role == Role::User || block.is_final,
        })
    }

    /// Remember the call; it is dispatched when its block ends.
    fn tool_use(&mut self, data: &Value) {
        let content = data["content"].as_str().unwrap_or("{}");
        let arguments = serde_json::from_str(content).unwrap_or_else(|_| json!({}));
        let call = ToolCall {
            tool_use_id: data["toolUseId"].as_str().unwrap_or_default().to_string(),
            name: data["toolName"].as_str().unwrap_or_default().to_string(),
            arguments,
        };

        let id = content_id(data).or_else(|| self.current.clone()).unwrap_or_default();
        self.blocks
            .entry(id)
            .or_insert_with(ContentBlock::unknown)
            .tool_call = Some(call);
    }

    fn content_end(&mut self, data: &Value) -> Option<AssistantEvent> {
        let id = content_id(data).or_else(|| self.current.clone()).unwrap_or_default();
        let interrupted = data["stopReason"].as_str() == Some("INTERRUPTED");

        let event = match self.blocks.get_mut(&id) {
            Some(block) if interrupted => mark_interrupted(block),
            Some(block) => block.tool_call.take().map(AssistantEvent::ToolCall),
            None if interrupted => Some(AssistantEvent::Interrupted),
            None => None,
        };
        self.blocks.remove(&id);
        if self.current.as_deref() == Some(id.as_str()) {
            self.current = None;
        }
        event
    }
}

fn mark_interrupted(block: &mut ContentBlock) -> Option<AssistantEvent> {
    if block.interrupted {
        return None;
    }
    block.interrupted = true;
    Some(AssistantEvent::Interrupted)
}

fn content_id(data: &Value) -> Option<String> {
    data["contentId"].as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    fn setup() -> SessionSetup {
        SessionSetup {
            system_instruction: "Be helpful.".to_string(),
            tools: ToolRegistry::banking().schemas(),
            voice_id: "tiffany".to_string(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            max_tokens: 1024,
            top_p: 0.9,
            temperature: 0.7,
        }
    }

    fn name_of(event: &Value) -> String {
        event["event"].as_object().unwrap().keys().next().unwrap().clone()
    }

    fn payload(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_opening_sequence() {
        let protocol = NovaProtocol::new();
        let events = protocol.opening(&setup());
        let names: Vec<String> = events.iter().map(name_of).collect();
        assert_eq!(
            names,
            ["sessionStart", "promptStart", "contentStart", "textInput", "contentEnd", "contentStart"]
        );

        assert_eq!(events[0]["event"]["sessionStart"]["inferenceConfiguration"]["maxTokens"], 1024);

        let prompt = &events[1]["event"]["promptStart"];
        assert_eq!(prompt["promptName"], protocol.prompt_name());
        assert_eq!(prompt["audioOutputConfiguration"]["voiceId"], "tiffany");
        assert_eq!(prompt["audioOutputConfiguration"]["sampleRateHertz"], 24000);

        let tool = &prompt["toolConfiguration"]["tools"][0]["toolSpec"];
        assert_eq!(tool["name"], "get_balance");
        let schema: Value = serde_json::from_str(tool["inputSchema"]["json"].as_str().unwrap()).unwrap();
        assert_eq!(schema["required"], json!(["username", "account_type"]));

        assert_eq!(events[2]["event"]["contentStart"]["role"], "SYSTEM");
        assert_eq!(events[3]["event"]["textInput"]["content"], "Be helpful.");

        let audio = &events[5]["event"]["contentStart"];
        assert_eq!(audio["type"], "AUDIO");
        assert_eq!(audio["interactive"], true);
        assert_eq!(audio["audioInputConfiguration"]["sampleRateHertz"], 16000);
    }

    #[test]
    fn test_audio_input_uses_open_audio_block() {
        let protocol = NovaProtocol::new();
        let opening = protocol.opening(&setup());
        let audio_block = opening[5]["event"]["contentStart"]["contentName"].clone();

        let input = protocol.audio_input(&[1, 0, 2, 0]);
        assert_eq!(input["event"]["audioInput"]["contentName"], audio_block);
        assert_eq!(input["event"]["audioInput"]["content"], STANDARD.encode([1u8, 0, 2, 0]));

        let closing = protocol.closing();
        assert_eq!(closing[0]["event"]["contentEnd"]["contentName"], audio_block);
        assert_eq!(name_of(&closing[1]), "promptEnd");
        assert_eq!(name_of(&closing[2]), "sessionEnd");
    }

    #[test]
    fn test_trigger_and_tool_result_blocks() {
        let protocol = NovaProtocol::new();

        let trigger = protocol.trigger();
        assert_eq!(trigger[0]["event"]["contentStart"]["role"], "USER");
        assert_eq!(trigger[0]["event"]["contentStart"]["interactive"], true);
        assert_eq!(trigger[1]["event"]["textInput"]["content"], TRIGGER_TEXT);

        let result = protocol.tool_result("tool-1", &json!({"balance": 5000}));
        let start = &result[0]["event"]["contentStart"];
        assert_eq!(start["type"], "TOOL");
        assert_eq!(start["toolResultInputConfiguration"]["toolUseId"], "tool-1");
        let content = result[1]["event"]["toolResult"]["content"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(content).unwrap(), json!({"balance": 5000}));
        assert_eq!(
            result[2]["event"]["contentEnd"]["contentName"],
            start["contentName"]
        );
    }

    #[test]
    fn test_parse_audio_output() {
        let mut parser = OutputParser::new(24000);
        let encoded = STANDARD.encode([1u8, 0, 2, 0]);
        let events = parser
            .parse(&payload(json!({"event": {"audioOutput": {"content": encoded}}})))
            .unwrap();
        assert_eq!(
            events,
            vec![AssistantEvent::Audio(AudioRawFrame::mono(vec![1, 0, 2, 0], 24000))]
        );
    }

    #[test]
    fn test_speculative_text_is_not_final() {
        let mut parser = OutputParser::new(16000);
        parser
            .parse(&payload(json!({"event": {"contentStart": {
                "contentId": "c1",
                "type": "TEXT",
                "role": "ASSISTANT",
                "additionalModelFields": "{\"generationStage\":\"SPECULATIVE\"}"
            }}})))
            .unwrap();
        let events = parser
            .parse(&payload(json!({"event": {"textOutput": {"contentId": "c1", "role": "ASSISTANT", "content": "Hello"}}})))
            .unwrap();
        assert_eq!(
            events,
            vec![AssistantEvent::Text {
                role: Role::Assistant,
                content: "Hello".to_string(),
                is_final: false
            }]
        );

        parser
            .parse(&payload(json!({"event": {"contentStart": {
                "contentId": "c2",
                "role": "ASSISTANT",
                "additionalModelFields": "{\"generationStage\":\"FINAL\"}"
            }}})))
            .unwrap();
        let events = parser
            .parse(&payload(json!({"event": {"textOutput": {"contentId": "c2", "role": "ASSISTANT", "content": "Hello"}}})))
            .unwrap();
        assert!(matches!(events[0], AssistantEvent::Text { is_final: true, .. }));
    }

    #[test]
    fn test_interruption_reported_once_per_block() {
        let mut parser = OutputParser::new(16000);
        parser
            .parse(&payload(json!({"event": {"contentStart": {"contentId": "c1", "role": "ASSISTANT"}}})))
            .unwrap();

        let marker = parser
            .parse(&payload(json!({"event": {"textOutput": {
                "contentId": "c1",
                "role": "ASSISTANT",
                "content": INTERRUPTED_MARKER
            }}})))
            .unwrap();
        assert_eq!(marker, vec![AssistantEvent::Interrupted]);

        let end = parser
            .parse(&payload(json!({"event": {"contentEnd": {"contentId": "c1", "stopReason": "INTERRUPTED"}}})))
            .unwrap();
        assert!(end.is_empty());
    }

    #[test]
    fn test_interrupted_content_end() {
        let mut parser = OutputParser::new(16000);
        parser
            .parse(&payload(json!({"event": {"contentStart": {"contentId": "a1", "type": "AUDIO", "role": "ASSISTANT"}}})))
            .unwrap();
        let events = parser
            .parse(&payload(json!({"event": {"contentEnd": {"contentId": "a1", "stopReason": "INTERRUPTED"}}})))
            .unwrap();
        assert_eq!(events, vec![AssistantEvent::Interrupted]);

        let events = parser
            .parse(&payload(json!({"event": {"contentEnd": {"contentId": "a2", "stopReason": "END_TURN"}}})))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_tool_call_dispatched_when_tool_block_ends() {
        let mut parser = OutputParser::new(16000);
        parser
            .parse(&payload(json!({"event": {"contentStart": {"contentId": "t1", "type": "TOOL", "role": "TOOL"}}})))
            .unwrap();
        let events = parser
            .parse(&payload(json!({"event": {"toolUse": {
                "contentId": "t1",
                "toolName": "get_balance",
                "toolUseId": "t-1",
                "content": "{\"username\":\"suresh\",\"account_type\":\"savings\"}"
            }}})))
            .unwrap();
        assert!(events.is_empty());

        let events = parser
            .parse(&payload(json!({"event": {"contentEnd": {"contentId": "t1", "type": "TOOL", "stopReason": "TOOL_USE"}}})))
            .unwrap();
        assert_eq!(
            events,
            vec![AssistantEvent::ToolCall(ToolCall {
                tool_use_id: "t-1".to_string(),
                name: "get_balance".to_string(),
                arguments: json!({"username": "suresh", "account_type": "savings"}),
            })]
        );

        // Only once
        let events = parser
            .parse(&payload(json!({"event": {"contentEnd": {"contentId": "t1", "type": "TOOL"}}})))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_tool_use_without_block_uses_current() {
        let mut parser = OutputParser::new(16000);
        parser
            .parse(&payload(json!({"event": {"toolUse": {"toolName": "get_balance", "toolUseId": "t-2", "content": "not json"}}})))
            .unwrap();
        let events = parser
            .parse(&payload(json!({"event": {"contentEnd": {"type": "TOOL"}}})))
            .unwrap();
        assert!(matches!(
            &events[..],
            [AssistantEvent::ToolCall(ToolCall { tool_use_id, arguments, .. })]
                if tool_use_id == "t-2" && *arguments == json!({})
        ));
    }

    #[test]
    fn test_assistant_text_without_stage_is_not_final() {
        let mut parser = OutputParser::new(16000);
        parser
            .parse(&payload(json!({"event": {"contentStart": {"contentId": "c1", "type": "TEXT", "role": "ASSISTANT"}}})))
            .unwrap();
        let events = parser
            .parse(&payload(json!({"event": {"textOutput": {"contentId": "c1", "role": "ASSISTANT", "content": "hi"}}})))
            .unwrap();
        assert_eq!(
            events,
            vec![AssistantEvent::Text {
                role: Role::Assistant,
                content: "hi".to_string(),
                is_final: false
            }]
        );

        // Unknown block, unknown stage
        let events = parser
            .parse(&payload(json!({"event": {"textOutput": {"contentId": "zz", "role": "ASSISTANT", "content": "hi"}}})))
            .unwrap();
        assert!(matches!(events[0], AssistantEvent::Text { is_final: false, .. }));
    }

    #[test]
    fn test_user_text_and_completion() {
        let mut parser = OutputParser::new(16000);
        let events = parser
            .parse(&payload(json!({"event": {"textOutput": {"role": "USER", "content": "hi there"}}})))
            .unwrap();
        assert_eq!(
            events,
            vec![AssistantEvent::Text {
                role: Role::User,
                content: "hi there".to_string(),
                is_final: true
            }]
        );

        let events = parser
            .parse(&payload(json!({"event": {"completionEnd": {"stopReason": "END_TURN"}}})))
            .unwrap();
        assert_eq!(events, vec![AssistantEvent::Ended]);

        let events = parser.parse(&payload(json!({"event": {"usageEvent": {}}}))).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_malformed_payloads() {
        let mut parser = OutputParser::new(16000);
        assert!(parser.parse(b"not json").is_err());
        assert!(parser.parse(&payload(json!({"other": {}}))).is_err());
        assert!(parser
            .parse(&payload(json!({"event": {"audioOutput": {"content": "!!!"}}})))
            .is_err());
    }
}
