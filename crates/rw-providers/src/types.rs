use std::fmt;
use std::time::Duration;

use rw_core::types::TokenUsage;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Split off the first system message. Adapters send it through the
/// backend's native system-prompt mechanism.
pub fn split_system(messages: &[Message]) -> (Option<&str>, Vec<&Message>) {
    let mut system = None;
    let mut rest = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role == Role::System && system.is_none() {
            system = Some(msg.content.as_str());
        } else {
            rest.push(msg);
        }
    }
    (system, rest)
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// A function the model may call. `parameters` is a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Request / response envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    pub tools: Vec<ToolDeclaration>,
    /// Deadline for the HTTP call. `None` leaves only the client defaults.
    pub timeout: Option<Duration>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: 1024,
            tools: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub message: Message,
    pub model: String,
    /// Backend-native finish reason, passed through untouched.
    pub finish_reason: String,
    pub usage: TokenUsage,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl CompletionResponse {
    pub fn text(&self) -> &str {
        &self.message.content
    }
}

/// One item of a streamed completion. A stream yields zero or more `Delta`s
/// and ends with exactly one `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Delta(String),
    Done {
        usage: TokenUsage,
        finish_reason: String,
    },
}

// ---------------------------------------------------------------------------
// Model catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Streaming,
    Tools,
    Vision,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    /// USD per 1,000 input tokens.
    pub input_price_per_1k: f64,
    /// USD per 1,000 output tokens.
    pub output_price_per_1k: f64,
    pub capabilities: Vec<Capability>,
}

impl ModelInfo {
    pub fn new(
        provider: &str,
        id: &str,
        context_window: u32,
        max_output_tokens: u32,
        prices: (f64, f64),
        capabilities: &[Capability],
    ) -> Self {
        Self {
            id: id.to_string(),
            provider: provider.to_string(),
            context_window,
            max_output_tokens,
            input_price_per_1k: prices.0,
            output_price_per_1k: prices.1,
            capabilities: capabilities.to_vec(),
        }
    }
}
