//! LlmClient trait definition

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

/// Stateless LLM client - each call is independent
///
/// No conversation state is kept between calls; everything a call needs,
/// including attempt history, goes into the request.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model id used for pricing
    fn model(&self) -> &str;

    /// Send a single completion request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
