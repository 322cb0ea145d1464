//! Ollama local model backend (native `/api/chat`).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rw_core::types::TokenUsage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::{ChunkStream, ProviderAdapter};
use crate::error::ProviderError;
use crate::http;
use crate::types::{
    split_system, Capability, CompletionRequest, CompletionResponse, Message, ModelInfo,
    StreamChunk, ToolCall,
};

pub const NAME: &str = "ollama";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Locally served models cost nothing.
pub fn static_catalog() -> Vec<ModelInfo> {
    use Capability::*;
    vec![
        ModelInfo::new(NAME, "llama3.1:8b", 131_072, 4_096, (0.0, 0.0), &[Chat, Streaming, Tools, Local]),
        ModelInfo::new(NAME, "qwen2.5:7b", 32_768, 4_096, (0.0, 0.0), &[Chat, Streaming, Tools, Local]),
        ModelInfo::new(NAME, "mistral:7b", 32_768, 4_096, (0.0, 0.0), &[Chat, Streaming, Local]),
    ]
}

pub struct OllamaAdapter {
    client: reqwest::Client,
    /// Only sent when the server sits behind an authenticating proxy.
    api_key: Option<String>,
    base_url: String,
}

impl OllamaAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: http::build_client(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The first system message leads the list; Ollama accepts `system`
    /// turns anywhere, so the rest keep their role.
    pub fn build_request(request: &CompletionRequest, stream: bool) -> ChatRequest {
        let (system, rest) = split_system(&request.messages);
        let mut messages = Vec::with_capacity(request.messages.len());
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system".into(),
                content: system.to_string(),
            });
        }
        messages.extend(rest.iter().map(|m| ChatMessage {
            role: m.role.to_string(),
            content: m.content.clone(),
        }));

        let tools = request
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        ChatRequest {
            model: request.model.clone(),
            messages,
            stream,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: Some(request.max_tokens),
            },
            tools,
        }
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder, key: Option<&str>) -> reqwest::RequestBuilder {
        match key {
            Some(k) => builder.bearer_auth(k),
            None => builder,
        }
    }

    fn post(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&Self::build_request(request, stream));
        self.with_auth(builder, self.api_key.as_deref())
    }

    async fn fetch_tags(&self, key: Option<&str>) -> Result<TagsResponse, ProviderError> {
        let timeout = Some(Duration::from_secs(5));
        let req = self.with_auth(self.client.get(format!("{}/api/tags", self.base_url)), key);
        let resp = http::send(NAME, req, timeout).await?;
        http::read_json(NAME, resp, timeout).await
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: ChatOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let resp = http::send(NAME, self.post(request, false), request.timeout).await?;
        let api: ChatResponse = http::read_json(NAME, resp, request.timeout).await?;
        if let Some(err) = api.error {
            return Err(ProviderError::malformed(NAME, err));
        }
        let message = api
            .message
            .ok_or_else(|| ProviderError::malformed(NAME, "response has no message"))?;

        Ok(CompletionResponse {
            message: Message::assistant(message.content),
            model: if api.model.is_empty() {
                request.model.clone()
            } else {
                api.model
            },
            finish_reason: api.done_reason.unwrap_or_else(|| "stop".into()),
            usage: TokenUsage::new(api.prompt_eval_count, api.eval_count),
            tool_calls: message
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(i, c)| ToolCall {
                    id: format!("call_{i}"),
                    name: c.function.name,
                    arguments: c.function.arguments,
                })
                .collect(),
        })
    }

    /// Newline-delimited JSON; the final object has `done: true` and the
    /// token counts.
    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let timeout = request.timeout;
        let resp = http::send(NAME, self.post(request, true), timeout).await?;

        Ok(Box::pin(async_stream::stream! {
            let lines = http::line_stream(NAME.to_string(), resp, timeout);
            futures_util::pin_mut!(lines);
            let mut finished = false;

            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => { yield Err(e); finished = true; break; }
                };
                let chunk = match http::parse_json::<ChatResponse>(NAME, &line) {
                    Ok(c) => c,
                    Err(e) => { yield Err(e); finished = true; break; }
                };
                if let Some(err) = chunk.error {
                    yield Err(ProviderError::malformed(NAME, err));
                    finished = true;
                    break;
                }
                if let Some(text) = chunk.message.map(|m| m.content).filter(|t| !t.is_empty()) {
                    yield Ok(StreamChunk::Delta(text));
                }
                if chunk.done {
                    yield Ok(StreamChunk::Done {
                        usage: TokenUsage::new(chunk.prompt_eval_count, chunk.eval_count),
                        finish_reason: chunk.done_reason.unwrap_or_else(|| "stop".into()),
                    });
                    finished = true;
                    break;
                }
            }
            if !finished {
                yield Err(ProviderError::malformed(NAME, "stream ended without done=true"));
            }
        }))
    }

    fn catalog(&self) -> Vec<ModelInfo> {
        static_catalog()
    }

    /// Installed models from `/api/tags`, priced from the static catalog
    /// when known. Falls back to the catalog if the server is unreachable.
    async fn models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let catalog = static_catalog();
        match self.fetch_tags(self.api_key.as_deref()).await {
            Ok(tags) => Ok(tags
                .models
                .into_iter()
                .map(|m| {
                    catalog
                        .iter()
                        .find(|c| c.id == m.name)
                        .cloned()
                        .unwrap_or_else(|| {
                            ModelInfo::new(
                                NAME,
                                &m.name,
                                8_192,
                                4_096,
                                (0.0, 0.0),
                                &[Capability::Chat, Capability::Streaming, Capability::Local],
                            )
                        })
                })
                .collect()),
            Err(e) => {
                tracing::debug!(error = %e, "ollama model discovery failed, using static catalog");
                Ok(catalog)
            }
        }
    }

    async fn validate_key(&self, credential: &str) -> Result<(), ProviderError> {
        let key = (!credential.is_empty()).then_some(credential);
        self.fetch_tags(key).await.map(|_| ())
    }
}
