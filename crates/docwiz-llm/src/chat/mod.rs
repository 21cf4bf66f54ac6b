use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

use crate::error::LLMError;
use crate::Usage;

/// Role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    /// The system/instruction participant
    System,
    /// The user/human participant in the conversation
    User,
    /// The AI assistant participant in the conversation
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of who sent this message.
    pub role: ChatRole,
    /// The text content of the message.
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chunk emitted by a streaming chat/completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunk {
    /// Text content delta
    Text(String),
    /// Usage metadata, typically carried by the final chunk
    Usage(Usage),
    /// Stream ended with a stop reason
    Done { stop_reason: String },
}

/// The normalized result of a single `complete`/`chat` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Fully normalized text content (see [`crate::RawCompletion::normalize`]).
    pub content: String,
    /// Name of the provider that produced this response (e.g. "openai").
    pub provider: String,
    /// Model name actually used.
    pub model: String,
    /// Token usage, when the provider reports it.
    pub usage: Option<Usage>,
}

impl fmt::Display for ChatResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.content)
    }
}

/// Uniform chat/completion capability implemented by every concrete provider.
///
/// Mirrors the gateway operations from the spec: `complete`, `chat`, `stream`.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Name of this provider as recorded in the model registry (e.g. "openai").
    fn provider_name(&self) -> &str;

    /// Whether this provider implementation supports streaming responses.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Single system+user prompt completion.
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ChatResponse, LLMError>;

    /// Multi-turn chat completion.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, LLMError>;

    /// Streaming variant of `complete`. Providers that don't support
    /// streaming return `NotImplemented`.
    async fn stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk, LLMError>> + Send>>, LLMError> {
        let _ = (system_prompt, user_prompt);
        Err(LLMError::NotImplemented(
            "streaming not supported by this provider".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_builders_set_role() {
        assert_eq!(ChatMessage::user("hi").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("hi").role, ChatRole::Assistant);
        assert_eq!(ChatMessage::system("hi").role, ChatRole::System);
    }

    #[test]
    fn chat_response_displays_content() {
        let r = ChatResponse {
            content: "hello".into(),
            provider: "openai".into(),
            model: "gpt-4".into(),
            usage: None,
        };
        assert_eq!(format!("{r}"), "hello");
    }
}
