//! OpenAI-compatible [`ChatProvider`] implementation.
//!
//! Talks to any `/chat/completions`-shaped endpoint (OpenAI itself, or a
//! self-hosted OpenAI-compatible gateway) directly over `reqwest`, grounded
//! on the teacher's `OpenAI` provider's request/response shapes but
//! collapsed from its HTTP-request-builder indirection into one async call.

use std::time::Duration;

use async_trait::async_trait;
use docwiz_llm::{ChatMessage, ChatProvider, ChatResponse, ChatRole, LLMError, Usage};
use serde::{Deserialize, Serialize};
use url::Url;

fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let p = url.path().to_string();
        url.set_path(&(p + "/"));
    }
    url
}

fn default_base_url() -> Url {
    Url::parse("https://api.openai.com/v1/").unwrap()
}

/// Configuration for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAI {
    pub api_key: String,
    pub base_url: Url,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout: Duration,
    client: reqwest::Client,
}

impl OpenAI {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: default_base_url(),
            model: model.into(),
            max_tokens: None,
            temperature: None,
            timeout: Duration::from_secs(120),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = normalize_base_url(base_url);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    async fn send(&self, messages: Vec<OpenAIChatMessage>) -> Result<ChatResponse, LLMError> {
        let url = self
            .base_url
            .join("chat/completions")
            .map_err(|e| LLMError::InvalidRequest(format!("bad base_url: {e}")))?;

        let body = OpenAIChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderError(format!(
                "openai returned {status}: {text}"
            )));
        }

        let parsed: OpenAIChatResponse = response.json().await.map_err(|e| {
            LLMError::ResponseFormatError {
                message: format!("failed to decode openai response: {e}"),
                raw_response: String::new(),
            }
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::ResponseFormatError {
                message: "openai response had no choices".into(),
                raw_response: String::new(),
            })?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            provider: "openai".into(),
            model: parsed.model,
            usage: parsed.usage,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAI {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<ChatResponse, LLMError> {
        let messages = vec![
            OpenAIChatMessage {
                role: "system",
                content: Some(system_prompt.to_string()),
            },
            OpenAIChatMessage {
                role: "user",
                content: Some(user_prompt.to_string()),
            },
        ];
        self.send(messages).await
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, LLMError> {
        let mapped = messages
            .iter()
            .map(|m| OpenAIChatMessage {
                role: match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                content: Some(m.content.clone()),
            })
            .collect();
        self.send(mapped).await
    }
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct OpenAIChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIChatResponse {
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let provider = OpenAI::new("sk-test", "gpt-4o-mini")
            .with_base_url(Url::parse("http://localhost:8000/v1").unwrap());
        assert_eq!(provider.base_url.as_str(), "http://localhost:8000/v1/");
        let joined = provider.base_url.join("chat/completions").unwrap();
        assert_eq!(joined.as_str(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn default_base_url_points_at_openai() {
        let provider = OpenAI::new("sk-test", "gpt-4o-mini");
        assert_eq!(provider.base_url.as_str(), "https://api.openai.com/v1/");
    }
}
