mod mock;
mod openrouter;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::PromptMessage;

pub use mock::MockModelProvider;
pub use openrouter::{DEFAULT_BASE_URL, OpenRouterProvider};

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model returned no choices")]
    EmptyReply,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}
