//! Anthropic Messages backend.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rw_core::types::TokenUsage;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::{ChunkStream, ProviderAdapter};
use crate::error::ProviderError;
use crate::http;
use crate::types::{
    split_system, Capability, CompletionRequest, CompletionResponse, Message, ModelInfo, Role,
    StreamChunk, ToolCall,
};

pub const NAME: &str = "anthropic";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub fn static_catalog() -> Vec<ModelInfo> {
    use Capability::*;
    vec![
        ModelInfo::new(NAME, "claude-opus-4-20250514", 200_000, 32_000, (0.015, 0.075), &[Chat, Streaming, Tools, Vision]),
        ModelInfo::new(NAME, "claude-sonnet-4-20250514", 200_000, 64_000, (0.003, 0.015), &[Chat, Streaming, Tools, Vision]),
        ModelInfo::new(NAME, "claude-3-5-haiku-20241022", 200_000, 8_192, (0.0008, 0.004), &[Chat, Streaming, Tools]),
    ]
}

pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http::build_client(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The first system message becomes the top-level `system` field. The
    /// Messages API has no in-list system role, so later system messages are
    /// sent as user turns.
    pub fn build_request_body(request: &CompletionRequest, stream: bool) -> Value {
        let (system, rest) = split_system(&request.messages);
        let messages: Vec<Value> = rest
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "assistant",
                    Role::User | Role::System => "user",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    fn authed(&self, builder: reqwest::RequestBuilder, key: &str) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
    }

    fn post(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .json(&Self::build_request_body(request, stream));
        self.authed(builder, &self.api_key)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Usage,
    },
    MessageStop,
    Error {
        error: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let resp = http::send(NAME, self.post(request, false), request.timeout).await?;
        let api: MessagesResponse = http::read_json(NAME, resp, request.timeout).await?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in api.content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(&t),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ContentBlock::Other => {}
            }
        }

        Ok(CompletionResponse {
            message: Message::assistant(text),
            model: api.model,
            finish_reason: api.stop_reason.unwrap_or_else(|| "unknown".into()),
            usage: TokenUsage::new(api.usage.input_tokens, api.usage.output_tokens),
            tool_calls,
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let timeout = request.timeout;
        let resp = http::send(NAME, self.post(request, true), timeout).await?;

        Ok(Box::pin(async_stream::stream! {
            let lines = http::line_stream(NAME.to_string(), resp, timeout);
            futures_util::pin_mut!(lines);
            let mut input_tokens = 0u64;
            let mut output_tokens = 0u64;
            let mut stop_reason: Option<String> = None;
            let mut finished = false;

            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => { yield Err(e); finished = true; break; }
                };
                let Some(data) = http::sse_data(&line) else { continue };
                let event = match http::parse_json::<StreamEvent>(NAME, data) {
                    Ok(ev) => ev,
                    Err(e) => { yield Err(e); finished = true; break; }
                };
                match event {
                    StreamEvent::MessageStart { message } => {
                        input_tokens = message.usage.input_tokens;
                    }
                    StreamEvent::ContentBlockDelta { delta: BlockDelta::TextDelta { text } } => {
                        yield Ok(StreamChunk::Delta(text));
                    }
                    StreamEvent::MessageDelta { delta, usage } => {
                        output_tokens = usage.output_tokens;
                        if delta.stop_reason.is_some() {
                            stop_reason = delta.stop_reason;
                        }
                    }
                    StreamEvent::MessageStop => {
                        yield Ok(StreamChunk::Done {
                            usage: TokenUsage::new(input_tokens, output_tokens),
                            finish_reason: stop_reason.take().unwrap_or_else(|| "unknown".into()),
                        });
                        finished = true;
                        break;
                    }
                    StreamEvent::Error { error } => {
                        yield Err(ProviderError::malformed(NAME, format!("stream error event: {error}")));
                        finished = true;
                        break;
                    }
                    _ => {}
                }
            }
            if !finished {
                yield Err(ProviderError::malformed(NAME, "stream ended without message_stop"));
            }
        }))
    }

    fn catalog(&self) -> Vec<ModelInfo> {
        static_catalog()
    }

    async fn validate_key(&self, credential: &str) -> Result<(), ProviderError> {
        let req = self.authed(
            self.client.get(format!("{}/v1/models", self.base_url)),
            credential,
        );
        http::send(NAME, req, Some(Duration::from_secs(15))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_system_message_goes_to_system_field() {
        let req = CompletionRequest::new(
            "claude-sonnet-4-20250514",
            vec![
                Message::system("You are terse."),
                Message::user("hi"),
                Message::assistant("hello"),
                Message::system("Also be kind."),
            ],
        );
        let body = AnthropicAdapter::build_request_body(&req, false);
        assert_eq!(body["system"], "You are terse.");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"], "Also be kind.");
    }

    #[test]
    fn no_system_field_without_system_message() {
        let req = CompletionRequest::new("claude-sonnet-4-20250514", vec![Message::user("hi")]);
        let body = AnthropicAdapter::build_request_body(&req, true);
        assert!(body.get("system").is_none());
        assert_eq!(body["stream"], true);
    }
}
