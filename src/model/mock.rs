use async_trait::async_trait;

use super::{CompletionError, CompletionRequest, ModelProvider};

/// Offline provider that echoes the visible part of the latest user message.
#[derive(Debug, Default)]
pub struct MockModelProvider;

#[async_trait]
impl ModelProvider for MockModelProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == "user")
            .ok_or(CompletionError::EmptyReply)?;
        let visible = last_user
            .content
            .split("<<hidden-notes>>")
            .next()
            .unwrap_or_default()
            .trim();

        Ok(format!(
            "ScenePilot mock reply ({} prompt messages, temperature {:.1}).\n\nYou said: {visible}",
            request.messages.len(),
            request.temperature
        ))
    }
}
