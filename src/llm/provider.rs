use async_trait::async_trait;

use crate::errors::TapClawResult;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, ToolDef};

/// Unified LLM provider trait. New providers implement this and are
/// registered from config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// The provider's identifier (matches the config.toml key).
    fn name(&self) -> &str;

    /// Whether a credential is configured for this provider.
    fn has_credential(&self) -> bool;

    /// Run one chat completion and return the accumulated response.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        cfg: &CallConfig,
    ) -> TapClawResult<LlmResponse>;
}
