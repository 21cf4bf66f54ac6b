//! Ollama-compatible [`ChatProvider`] implementation.
//!
//! Talks to the `/api/chat` endpoint directly over `reqwest`. The only
//! difference between a locally-running daemon and a remote one is the
//! `base_url` and the name this provider registers itself under, so one
//! struct covers both (the teacher's own `ollama` crate carries no source
//! to ground the wire shape on, so this follows the OpenAI-compatible
//! provider's structure against Ollama's documented chat API).

use std::time::Duration;

use async_trait::async_trait;
use docwiz_llm::{ChatMessage, ChatProvider, ChatResponse, ChatRole, LLMError, RawCompletion, Usage};
use serde::{Deserialize, Serialize};
use url::Url;

fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let p = url.path().to_string();
        url.set_path(&(p + "/"));
    }
    url
}

fn default_local_base_url() -> Url {
    Url::parse("http://localhost:11434/").unwrap()
}

/// Whether this instance talks to a daemon on the same host or a remote one.
///
/// Only affects the name this provider registers itself under in the model
/// registry; the wire protocol is identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    Local,
    Remote,
}

/// Configuration for one Ollama daemon, local or remote.
#[derive(Debug, Clone)]
pub struct Ollama {
    pub base_url: Url,
    pub model: String,
    pub locality: Locality,
    pub temperature: Option<f32>,
    pub timeout: Duration,
    client: reqwest::Client,
}

impl Ollama {
    /// Points at a daemon running on the same host as the caller.
    pub fn local(model: impl Into<String>) -> Self {
        Self::new(default_local_base_url(), model, Locality::Local)
    }

    /// Points at a daemon reachable over the network.
    pub fn remote(base_url: Url, model: impl Into<String>) -> Self {
        Self::new(base_url, model, Locality::Remote)
    }

    fn new(base_url: Url, model: impl Into<String>, locality: Locality) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            model: model.into(),
            locality,
            temperature: None,
            timeout: Duration::from_secs(300),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    async fn send(&self, messages: Vec<OllamaMessage>) -> Result<ChatResponse, LLMError> {
        let url = self.base_url.join("api/chat")?;

        let body = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: self.temperature.map(|temperature| OllamaOptions { temperature }),
        };

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderError(format!(
                "ollama ({}) returned {status}: {text}",
                self.provider_name()
            )));
        }

        let parsed: OllamaChatResponse = response.json().await.map_err(|e| {
            LLMError::ResponseFormatError {
                message: format!("failed to decode ollama response: {e}"),
                raw_response: String::new(),
            }
        })?;

        let usage = if parsed.prompt_eval_count.is_some() || parsed.eval_count.is_some() {
            Some(Usage {
                input_tokens: parsed.prompt_eval_count.unwrap_or(0),
                output_tokens: parsed.eval_count.unwrap_or(0),
            })
        } else {
            None
        };

        // Some Ollama-fronted backends (and custom model adapters) emit the
        // message content as a plain string, as an array of string chunks,
        // or as an integer-keyed object of chunks rather than a single
        // string; `RawCompletion` collapses all three to one `String`.
        let content = parsed.message.content.normalize()?;

        Ok(ChatResponse {
            content,
            provider: self.provider_name().into(),
            model: parsed.model,
            usage,
        })
    }
}

#[async_trait]
impl ChatProvider for Ollama {
    fn provider_name(&self) -> &str {
        match self.locality {
            Locality::Local => "ollama_local",
            Locality::Remote => "ollama_remote",
        }
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<ChatResponse, LLMError> {
        let messages = vec![
            OllamaMessage {
                role: "system",
                content: system_prompt.to_string(),
            },
            OllamaMessage {
                role: "user",
                content: user_prompt.to_string(),
            },
        ];
        self.send(messages).await
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, LLMError> {
        let mapped = messages
            .iter()
            .map(|m| OllamaMessage {
                role: match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                content: m.content.clone(),
            })
            .collect();
        self.send(mapped).await
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    model: String,
    message: OllamaResponseMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: RawCompletion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_and_remote_register_under_distinct_names() {
        let local = Ollama::local("llama3");
        let remote = Ollama::remote(Url::parse("http://10.0.0.5:11434").unwrap(), "llama3");
        assert_eq!(local.provider_name(), "ollama_local");
        assert_eq!(remote.provider_name(), "ollama_remote");
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let provider = Ollama::local("llama3");
        assert_eq!(provider.base_url.as_str(), "http://localhost:11434/");
        let joined = provider.base_url.join("api/chat").unwrap();
        assert_eq!(joined.as_str(), "http://localhost:11434/api/chat");
    }
}
