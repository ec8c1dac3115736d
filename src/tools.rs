//! # Assistant Tools
//!
//! Functions the speech-to-speech model may call mid-conversation, their
//! JSON schemas, and the registry that dispatches calls by name.
//!
//! Tool results are plain JSON objects handed back to the model verbatim;
//! failures are reported as `{"message": ...}` so the assistant can say
//! something sensible instead of the session erroring out.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// A function declaration in JSON-schema form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    /// Property name -> JSON schema
    pub properties: Map<String, Value>,
    pub required: Vec<String>,
}

impl FunctionSchema {
    /// The `inputSchema` object the model expects.
    pub fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
        })
    }
}

/// Every tool offered to the model in one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolsSchema {
    pub standard_tools: Vec<FunctionSchema>,
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> FunctionSchema;

    async fn call(&self, arguments: Value) -> Value;
}

/// Name -> tool dispatch table.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the banking demo tools.
    pub fn banking() -> Self {
        let mut registry = Self::new();
        registry.register(BalanceTool);
        registry
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.schema().name;
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn schemas(&self) -> ToolsSchema {
        let mut standard_tools: Vec<FunctionSchema> =
            self.tools.values().map(|tool| tool.schema()).collect();
        standard_tools.sort_by(|a, b| a.name.cmp(&b.name));
        ToolsSchema { standard_tools }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool by name.
    ///
    /// Unknown tools and timeouts come back as a `message` result.
    pub async fn execute(&self, name: &str, arguments: Value) -> Value {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "Model requested an unknown tool");
            return json!({ "message": format!("Unknown tool: {}", name) });
        };

        debug!(tool = name, "Executing tool");
        match tokio::time::timeout(TOOL_TIMEOUT, tool.call(arguments)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = name, timeout_secs = TOOL_TIMEOUT.as_secs(), "Tool timed out");
                json!({ "message": format!("Tool {} timed out", name) })
            }
        }
    }
}

/// Passphrases that unlock the demo account, compared case-insensitively.
const ACCEPTED_PASSCODES: [&str; 2] = ["nova sonic is awesome", "novasonic is awesome"];
const DEMO_USER: &str = "suresh";

/// Account balance lookup against a single hard-coded demo customer.
pub struct BalanceTool;

impl BalanceTool {
    fn lookup(username: &str, passcode: Option<&str>, account_type: &str) -> Value {
        if username != DEMO_USER {
            return json!({ "message": "No such user found." });
        }

        let accepted = passcode
            .map(|code| code.trim().to_lowercase())
            .is_some_and(|code| ACCEPTED_PASSCODES.contains(&code.as_str()));
        if !accepted {
            warn!(username, "Incorrect passcode");
            return json!({ "message": "Incorrect passcode." });
        }

        let balance = if account_type == "savings" { 5000 } else { 14000 };
        json!({ "balance": balance })
    }
}

#[async_trait]
impl Tool for BalanceTool {
    fn schema(&self) -> FunctionSchema {
        let mut properties = Map::new();
        properties.insert(
            "username".to_string(),
            json!({
                "type": "string",
                "description": "The username for which the account balance is to be fetched."
            }),
        );
        properties.insert(
            "secret_passcode".to_string(),
            json!({
                "type": "string",
                "description": "A sentence to be used as the secret passcode to access the account details."
            }),
        );
        properties.insert(
            "account_type".to_string(),
            json!({
                "type": "string",
                "description": "The type of the account. Either savings or fixed deposit."
            }),
        );

        FunctionSchema {
            name: "get_balance".to_string(),
            description: "Get an account balance.".to_string(),
            properties,
            required: vec!["username".to_string(), "account_type".to_string()],
        }
    }

    async fn call(&self, arguments: Value) -> Value {
        let username = arguments["username"].as_str().unwrap_or_default();
        let passcode = arguments["secret_passcode"].as_str();
        let account_type = arguments["account_type"].as_str().unwrap_or_default();
        Self::lookup(username, passcode, account_type)
    }
}
