//! In-process adapter for tests and local development.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rw_core::types::TokenUsage;

use crate::adapter::{ChunkStream, ProviderAdapter};
use crate::error::ProviderError;
use crate::types::{Capability, CompletionRequest, CompletionResponse, Message, ModelInfo, StreamChunk};

/// Returns queued responses in order, then a default reply. Every request
/// is captured for assertions.
pub struct MockAdapter {
    name: String,
    responses: Arc<Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>>,
    captured: Arc<Mutex<Vec<CompletionRequest>>>,
    delay: Duration,
    catalog: Vec<ModelInfo>,
    accepted_key: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        let catalog = vec![ModelInfo::new(
            &name,
            "mock-model",
            8_192,
            1_024,
            (0.005, 0.015),
            &[Capability::Chat, Capability::Streaming],
        )];
        Self {
            name,
            responses: Arc::new(Mutex::new(VecDeque::new())),
            captured: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            catalog,
            accepted_key: None,
        }
    }

    /// Queue a successful reply with the given text and token counts.
    pub fn with_reply(self, text: &str, input_tokens: u64, output_tokens: u64) -> Self {
        let response = CompletionResponse {
            message: Message::assistant(text),
            model: "mock-model".into(),
            finish_reason: "end_turn".into(),
            usage: TokenUsage::new(input_tokens, output_tokens),
            tool_calls: Vec::new(),
        };
        self.with_response(response)
    }

    pub fn with_response(self, response: CompletionResponse) -> Self {
        lock(&self.responses).push_back(Ok(response));
        self
    }

    pub fn with_error(self, error: ProviderError) -> Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    /// Sleep this long inside every call, simulating backend latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_catalog(mut self, catalog: Vec<ModelInfo>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Make `validate_key` accept only this credential.
    pub fn with_accepted_key(mut self, key: impl Into<String>) -> Self {
        self.accepted_key = Some(key.into());
        self
    }

    pub fn captured_requests(&self) -> Vec<CompletionRequest> {
        lock(&self.captured).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.captured).len()
    }

    fn default_response(model: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant("Mock response"),
            model: model.to_string(),
            finish_reason: "end_turn".into(),
            usage: TokenUsage::new(10, 5),
            tool_calls: Vec::new(),
        }
    }

    async fn next(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        lock(&self.captured).push(request.clone());
        if !self.delay.is_zero() {
            match request.timeout {
                Some(t) if t < self.delay => {
                    tokio::time::sleep(t).await;
                    return Err(ProviderError::timeout(&self.name, t));
                }
                _ => tokio::time::sleep(self.delay).await,
            }
        }
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(Self::default_response(&request.model)))
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.next(request).await
    }

    /// Streams the reply word by word.
    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let response = self.next(request).await?;
        let mut chunks: Vec<Result<StreamChunk, ProviderError>> = response
            .message
            .content
            .split_inclusive(' ')
            .map(|w| Ok(StreamChunk::Delta(w.to_string())))
            .collect();
        chunks.push(Ok(StreamChunk::Done {
            usage: response.usage,
            finish_reason: response.finish_reason,
        }));
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    fn catalog(&self) -> Vec<ModelInfo> {
        self.catalog.clone()
    }

    async fn validate_key(&self, credential: &str) -> Result<(), ProviderError> {
        match &self.accepted_key {
            Some(k) if k != credential => Err(ProviderError::http(&self.name, 401, "invalid api key")),
            _ => Ok(()),
        }
    }
}
