//! LLM provider abstraction.
//!
//! One [`ProviderAdapter`] per backend translates the normalized
//! [`CompletionRequest`] into the backend's wire format and normalizes the
//! reply. The [`ProviderRegistry`] holds adapters by name and the
//! [`CostCalculator`] prices token usage.

pub mod adapter;
pub mod anthropic;
pub mod error;
pub mod gemini;
pub mod http;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod pricing;
pub mod registry;
pub mod tokens;
pub mod types;

pub use adapter::{ChunkStream, ProviderAdapter};
pub use error::{FailureKind, ProviderError};
pub use pricing::{CostCalculator, PricingError};
pub use registry::{ProviderKind, ProviderRegistry, RegistryError};
pub use types::{
    Capability, CompletionRequest, CompletionResponse, Message, ModelInfo, Role, StreamChunk,
    ToolCall, ToolDeclaration,
};
