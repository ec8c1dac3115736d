//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (set by container platforms)
//! 2. Environment variables (APP_SERVER__PORT, APP_ASSISTANT__VOICE_ID, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys use a double underscore so that field names containing a
//! single underscore (`voice_id`, `api_key`) survive the mapping.

use crate::serializer::InputParams;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, auth, audio, assistant)
/// keeps each concern small and lets `APP_<SECTION>__<FIELD>` map cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub audio: AudioSettings,
    pub assistant: AssistantConfig,
    pub credentials: CredentialsConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: Accept connections from the load balancer (container default)
/// - `port = 8000`: Container port the target group health-checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// WebSocket access control.
///
/// Clients present `api_key` as the `Sec-WebSocket-Protocol` value; the
/// handshake echoes it back as the selected subprotocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub api_key: String,
}

/// Sample rates for each leg of the audio path.
///
/// ## Fields:
/// - `sample_rate`: Pipeline input rate (what the assistant hears)
/// - `output_sample_rate`: Rate the assistant speaks at
/// - `client_sample_rate`: Rate on the WebSocket, both directions
/// - `input_queue_capacity`: Frames buffered toward the assistant before dropping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub output_sample_rate: u32,
    pub client_sample_rate: u32,
    pub input_queue_capacity: usize,
}

impl AudioSettings {
    /// Parameters for the wire serializer.
    pub fn serializer_params(&self) -> InputParams {
        InputParams {
            target_sample_rate: self.client_sample_rate,
            sample_rate: None,
        }
    }
}

/// Speech-to-speech model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub region: String,
    pub model_id: String,
    /// Available voices: matthew, tiffany, amy
    pub voice_id: String,
    /// File holding the system prompt
    pub prompt_path: PathBuf,
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
    /// Ask the assistant to speak first once the session opens
    pub greet_on_connect: bool,
}

/// Where container credentials are fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// ECS task metadata endpoint; the relative URI comes from the environment
    pub metadata_endpoint: String,
    pub timeout_secs: u64,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            auth: AuthConfig {
                api_key: "Your-own-long-secret-text-to-access-the-api".to_string(),
            },
            audio: AudioSettings {
                sample_rate: 16000,
                output_sample_rate: 16000,
                client_sample_rate: 16000,
                input_queue_capacity: 64,
            },
            assistant: AssistantConfig {
                region: "us-east-1".to_string(),
                model_id: "amazon.nova-sonic-v1:0".to_string(),
                voice_id: "tiffany".to_string(),
                prompt_path: PathBuf::from("prompt.txt"),
                max_tokens: 1024,
                top_p: 0.9,
                temperature: 0.7,
                greet_on_connect: true,
            },
            credentials: CredentialsConfig {
                metadata_endpoint: "http://169.254.170.2".to_string(),
                timeout_secs: 2,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`: Override server port
    /// - `APP_AUTH__API_KEY=...`: Override the WebSocket credential
    /// - `APP_ASSISTANT__VOICE_ID=matthew`: Change the voice
    /// - `HOST=0.0.0.0` / `PORT=8000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        Self::load_from("config", env::vars().collect())
    }

    /// Same layering as `load`, from the file `name` (extension optional)
    /// and `vars` in place of the process environment.
    pub fn load_from(name: &str, vars: config::Map<String, String>) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(name).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .source(Some(vars.clone())),
            );

        if let Some(host) = vars.get("HOST") {
            settings = settings.set_override("server.host", host.as_str())?;
        }

        if let Some(port) = vars.get("PORT") {
            settings = settings.set_override("server.port", port.as_str())?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The API key is not empty (an empty subprotocol can't be negotiated)
    /// - Every sample rate is positive
    /// - Queue and session limits allow at least one item
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.auth.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("API key cannot be empty"));
        }

        let rates = [
            ("audio.sample_rate", self.audio.sample_rate),
            ("audio.output_sample_rate", self.audio.output_sample_rate),
            ("audio.client_sample_rate", self.audio.client_sample_rate),
        ];
        for (name, rate) in rates {
            if rate == 0 {
                return Err(anyhow::anyhow!("{} must be greater than 0", name));
            }
        }

        if self.audio.input_queue_capacity == 0 {
            return Err(anyhow::anyhow!("Input queue capacity must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.assistant.top_p) {
            return Err(anyhow::anyhow!("top_p must be between 0 and 1"));
        }

        Ok(())
    }

    /// Configuration as JSON with secrets masked, for the config endpoint.
    pub fn redacted(&self) -> serde_json::Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(auth) = value.get_mut("auth").and_then(|v| v.as_object_mut()) {
            auth.insert("api_key".to_string(), serde_json::Value::from("***"));
        }
        Ok(value)
    }
}
