use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::ProviderError;
use crate::types::{CompletionRequest, CompletionResponse, ModelInfo, StreamChunk};

/// Lazy, finite sequence of chunks. Dropping it early closes the connection.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Capability contract every backend implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable registry identifier (e.g. `"anthropic"`).
    fn name(&self) -> &str;

    /// Single-shot completion.
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;

    /// Incremental completion ending in a [`StreamChunk::Done`].
    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream, ProviderError>;

    /// Static model metadata, including prices.
    fn catalog(&self) -> Vec<ModelInfo>;

    /// Models currently offered. Defaults to the static catalog.
    async fn models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        Ok(self.catalog())
    }

    /// Minimal authenticated round trip confirming `credential` works
    /// against this adapter's endpoint.
    async fn validate_key(&self, credential: &str) -> Result<(), ProviderError>;
}
