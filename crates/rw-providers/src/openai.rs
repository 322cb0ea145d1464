//! OpenAI Chat Completions backend.

use async_trait::async_trait;
use futures_util::StreamExt;
use rw_core::types::TokenUsage;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::{ChunkStream, ProviderAdapter};
use crate::error::ProviderError;
use crate::http;
use crate::types::{
    Capability, CompletionRequest, CompletionResponse, Message, ModelInfo, StreamChunk, ToolCall,
};

pub const NAME: &str = "openai";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Static catalog, prices in USD per 1K tokens.
pub fn static_catalog() -> Vec<ModelInfo> {
    use Capability::*;
    vec![
        ModelInfo::new(NAME, "gpt-4o", 128_000, 16_384, (0.0025, 0.01), &[Chat, Streaming, Tools, Vision]),
        ModelInfo::new(NAME, "gpt-4o-mini", 128_000, 16_384, (0.00015, 0.0006), &[Chat, Streaming, Tools, Vision]),
        ModelInfo::new(NAME, "gpt-4.1", 1_047_576, 32_768, (0.002, 0.008), &[Chat, Streaming, Tools, Vision]),
        ModelInfo::new(NAME, "o3-mini", 200_000, 100_000, (0.0011, 0.0044), &[Chat, Streaming, Tools]),
    ]
}

pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http::build_client(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Override the base URL (Azure-style gateways, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// System messages stay inline; OpenAI accepts them anywhere in the list.
    pub fn build_request_body(request: &CompletionRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.to_string(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    fn post(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Self::build_request_body(request, stream))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// OpenAI encodes arguments as a JSON string; keep the raw text if it
/// does not parse.
pub(crate) fn parse_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let resp = http::send(NAME, self.post(request, false), request.timeout).await?;
        let api: ChatResponse = http::read_json(NAME, resp, request.timeout).await?;

        let choice = api
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::malformed(NAME, "no choices in response"))?;
        let usage = api
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(CompletionResponse {
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            model: api.model,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "unknown".into()),
            usage,
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: parse_arguments(&c.function.arguments),
                })
                .collect(),
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let timeout = request.timeout;
        let resp = http::send(NAME, self.post(request, true), timeout).await?;

        Ok(Box::pin(async_stream::stream! {
            let lines = http::line_stream(NAME.to_string(), resp, timeout);
            futures_util::pin_mut!(lines);
            let mut usage = TokenUsage::default();
            let mut finish_reason: Option<String> = None;
            let mut finished = false;

            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => { yield Err(e); finished = true; break; }
                };
                let Some(data) = http::sse_data(&line) else { continue };
                if data == "[DONE]" {
                    yield Ok(StreamChunk::Done {
                        usage,
                        finish_reason: finish_reason.take().unwrap_or_else(|| "unknown".into()),
                    });
                    finished = true;
                    break;
                }
                match http::parse_json::<ChatChunk>(NAME, data) {
                    Ok(chunk) => {
                        if let Some(u) = chunk.usage {
                            usage = TokenUsage::new(u.prompt_tokens, u.completion_tokens);
                        }
                        for choice in chunk.choices {
                            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                                yield Ok(StreamChunk::Delta(text));
                            }
                            if choice.finish_reason.is_some() {
                                finish_reason = choice.finish_reason;
                            }
                        }
                    }
                    Err(e) => { yield Err(e); finished = true; break; }
                }
            }
            if !finished {
                yield Err(ProviderError::malformed(NAME, "stream ended without [DONE]"));
            }
        }))
    }

    fn catalog(&self) -> Vec<ModelInfo> {
        static_catalog()
    }

    async fn validate_key(&self, credential: &str) -> Result<(), ProviderError> {
        let req = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(credential);
        http::send(NAME, req, Some(std::time::Duration::from_secs(15))).await?;
        Ok(())
    }
}
