//! Google Gemini (Generative Language API) backend.

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

pub const NAME: &str = "gemini";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub fn static_catalog() -> Vec<ModelInfo> {
    use Capability::*;
    vec![
        ModelInfo::new(NAME, "gemini-2.5-pro", 1_048_576, 65_536, (0.00125, 0.01), &[Chat, Streaming, Tools, Vision]),
        ModelInfo::new(NAME, "gemini-2.5-flash", 1_048_576, 65_536, (0.0003, 0.0025), &[Chat, Streaming, Tools, Vision]),
        ModelInfo::new(NAME, "gemini-2.0-flash", 1_048_576, 8_192, (0.0001, 0.0004), &[Chat, Streaming, Tools, Vision]),
    ]
}

pub struct GeminiAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiAdapter {
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

    /// `systemInstruction` carries the first system message, `assistant`
    /// becomes `model`, and later system messages are sent as user turns.
    pub fn build_request_body(request: &CompletionRequest) -> Value {
        let (system, rest) = split_system(&request.messages);
        let contents: Vec<Value> = rest
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    Role::User | Role::System => "user",
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let mut generation = json!({ "maxOutputTokens": request.max_tokens });
        if let Some(t) = request.temperature {
            generation["temperature"] = json!(t);
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation,
        });
        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        body
    }

    fn post(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let url = if stream {
            format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, request.model
            )
        } else {
            format!("{}/v1beta/models/{}:generateContent", self.base_url, request.model)
        };
        self.client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_request_body(request))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl UsageMetadata {
    fn normalize(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_token_count, self.candidates_token_count)
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let resp = http::send(NAME, self.post(request, false), request.timeout).await?;
        let api: GenerateResponse = http::read_json(NAME, resp, request.timeout).await?;

        let candidate = api
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::malformed(NAME, "no candidates in response"))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for (i, part) in candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                // Gemini has no call ids; synthesize stable ones.
                tool_calls.push(ToolCall {
                    id: format!("{}-{}", call.name, i),
                    name: call.name,
                    arguments: call.args,
                });
            }
        }

        Ok(CompletionResponse {
            message: Message::assistant(text),
            model: api.model_version.unwrap_or_else(|| request.model.clone()),
            finish_reason: candidate.finish_reason.unwrap_or_else(|| "unknown".into()),
            usage: api
                .usage_metadata
                .map(|u| u.normalize())
                .unwrap_or_default(),
            tool_calls,
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
            let mut failed = false;

            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => { yield Err(e); failed = true; break; }
                };
                let Some(data) = http::sse_data(&line) else { continue };
                let chunk = match http::parse_json::<GenerateResponse>(NAME, data) {
                    Ok(c) => c,
                    Err(e) => { yield Err(e); failed = true; break; }
                };
                if let Some(u) = &chunk.usage_metadata {
                    usage = u.normalize();
                }
                for candidate in chunk.candidates {
                    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                        if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                            yield Ok(StreamChunk::Delta(text));
                        }
                    }
                    if candidate.finish_reason.is_some() {
                        finish_reason = candidate.finish_reason;
                    }
                }
            }

            // The SSE body simply ends; the last event carries finishReason.
            if !failed {
                match finish_reason {
                    Some(reason) => {
                        yield Ok(StreamChunk::Done { usage, finish_reason: reason });
                    }
                    None => {
                        yield Err(ProviderError::malformed(NAME, "stream ended without finishReason"));
                    }
                }
            }
        }))
    }

    fn catalog(&self) -> Vec<ModelInfo> {
        static_catalog()
    }

    async fn validate_key(&self, credential: &str) -> Result<(), ProviderError> {
        let req = self
            .client
            .get(format!("{}/v1beta/models", self.base_url))
            .header("x-goog-api-key", credential);
        http::send(NAME, req, Some(Duration::from_secs(15))).await?;
        Ok(())
    }
}
