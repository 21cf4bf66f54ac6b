//! Provider-abstracted LLM gateway.
//!
//! Exposes a uniform [`chat::ChatProvider`] trait that concrete provider
//! crates implement, a [`model::ModelRecord`]/[`registry::ModelRegistry`]
//! pair for model selection, and a [`gateway::Gateway`] that ties the two
//! together and normalizes usage accounting across providers.

pub mod auth;
pub mod builder;
pub mod chat;
pub mod error;
pub mod gateway;
pub mod model;
pub mod raw;
pub mod registry;

use serde::{Deserialize, Serialize};

/// Token accounting for a single completion, normalized across the field
/// names different providers use for the same concept.
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq, Default)]
pub struct Usage {
    #[serde(alias = "prompt_tokens", alias = "input_tokens", alias = "prompt_eval_count", alias = "promptTokenCount")]
    pub input_tokens: u32,
    #[serde(alias = "completion_tokens", alias = "output_tokens", alias = "eval_count", alias = "candidatesTokenCount")]
    pub output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

pub use chat::{ChatMessage, ChatProvider, ChatResponse, ChatRole, StreamChunk};
pub use error::LLMError;
pub use gateway::Gateway;
pub use model::ModelRecord;
pub use raw::RawCompletion;
pub use registry::ModelRegistry;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_aliases_normalize_provider_field_names() {
        let openai: Usage =
            serde_json::from_str(r#"{"prompt_tokens": 10, "completion_tokens": 5}"#).unwrap();
        let ollama: Usage =
            serde_json::from_str(r#"{"prompt_eval_count": 10, "eval_count": 5}"#).unwrap();
        let google: Usage =
            serde_json::from_str(r#"{"promptTokenCount": 10, "candidatesTokenCount": 5}"#)
                .unwrap();

        assert_eq!(openai, ollama);
        assert_eq!(ollama, google);
        assert_eq!(openai.total_tokens(), 15);
    }
}
