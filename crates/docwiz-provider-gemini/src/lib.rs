//! Gemini-compatible [`ChatProvider`] implementation.
//!
//! Talks to the `:generateContent` REST endpoint directly over `reqwest`,
//! grounded on the teacher's `Google` provider's request/response shapes
//! (API key passed as a `key` query parameter, `contents`/`generationConfig`
//! request body, `candidates[0].content.parts[].text` response) but
//! collapsed from its HTTP-request-builder indirection into one async call.

use std::time::Duration;

use async_trait::async_trait;
use docwiz_llm::{ChatMessage, ChatProvider, ChatResponse, ChatRole, LLMError, Usage};
use serde::{Deserialize, Serialize};
use url::Url;

fn default_base_url() -> Url {
    Url::parse("https://generativelanguage.googleapis.com/v1beta/models/").unwrap()
}

/// Configuration for one Gemini model endpoint.
#[derive(Debug, Clone)]
pub struct Gemini {
    pub api_key: String,
    pub base_url: Url,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub timeout: Duration,
    client: reqwest::Client,
}

impl Gemini {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: default_base_url(),
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            timeout: Duration::from_secs(120),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
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

    async fn send(&self, contents: Vec<GeminiContent>) -> Result<ChatResponse, LLMError> {
        let path = format!("{}:generateContent", &self.model);
        let mut url = self.base_url.join(&path)?;
        url.set_query(Some(&format!("key={}", &self.api_key)));

        let body = GeminiChatRequest {
            contents,
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
                top_p: self.top_p,
                top_k: self.top_k,
            },
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
                "gemini returned {status}: {text}"
            )));
        }

        let parsed: GeminiChatResponse = response.json().await.map_err(|e| {
            LLMError::ResponseFormatError {
                message: format!("failed to decode gemini response: {e}"),
                raw_response: String::new(),
            }
        })?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::ResponseFormatError {
                message: "gemini response had no candidates".into(),
                raw_response: String::new(),
            })?;

        let content = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<String>();

        Ok(ChatResponse {
            content,
            provider: "gemini".into(),
            model: self.model.clone(),
            usage: parsed.usage_metadata,
        })
    }
}

#[async_trait]
impl ChatProvider for Gemini {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<ChatResponse, LLMError> {
        // Gemini has no dedicated system role; fold it into the first user turn.
        let combined = format!("{system_prompt}\n\n{user_prompt}");
        let contents = vec![GeminiContent {
            role: "user".into(),
            parts: vec![GeminiPart { text: combined }],
        }];
        self.send(contents).await
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, LLMError> {
        let contents = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| GeminiContent {
                role: match m.role {
                    ChatRole::User => "user".into(),
                    ChatRole::Assistant => "model".into(),
                    ChatRole::System => unreachable!("system turns filtered above"),
                },
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            })
            .collect();
        self.send(contents).await
    }
}

#[derive(Serialize)]
struct GeminiChatRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize, Default)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(rename = "topK", skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Deserialize)]
struct GeminiChatResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<Usage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_content_path_includes_model_and_key() {
        let provider = Gemini::new("my-key", "gemini-1.5-flash");
        let path = format!("{}:generateContent", &provider.model);
        let mut url = provider.base_url.join(&path).unwrap();
        url.set_query(Some(&format!("key={}", &provider.api_key)));
        assert_eq!(
            url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent?key=my-key"
        );
    }

    #[test]
    fn system_role_is_filtered_from_chat_history() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hi"),
        ];
        let contents: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != ChatRole::System).collect();
        assert_eq!(contents.len(), 1);
    }
}
