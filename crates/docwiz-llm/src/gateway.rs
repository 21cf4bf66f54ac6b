//! Provider-abstracted gateway: selects a model via the registry, dispatches
//! to the matching `ChatProvider`, and records usage on success.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::chat::{ChatMessage, ChatProvider, ChatResponse};
use crate::error::LLMError;
use crate::registry::ModelRegistry;

/// Order in which providers are tried when no model is pinned explicitly.
#[derive(Debug, Clone, Default)]
pub struct ProviderPreference(pub Vec<String>);

/// Dispatches completions to whichever provider the registry selects.
pub struct Gateway {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    registry: Arc<ModelRegistry>,
    preference: ProviderPreference,
}

impl Gateway {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            providers: HashMap::new(),
            registry,
            preference: ProviderPreference::default(),
        }
    }

    pub fn with_preference(mut self, preference: Vec<String>) -> Self {
        self.preference = ProviderPreference(preference);
        self
    }

    /// Registers a concrete provider under its name in the model registry.
    pub fn register_provider(&mut self, name: impl Into<String>, provider: Arc<dyn ChatProvider>) {
        self.providers.insert(name.into(), provider);
    }

    fn pick_provider(&self) -> Result<(Arc<dyn ChatProvider>, String), LLMError> {
        let model = self
            .registry
            .select(&self.preference.0)
            .ok_or_else(|| LLMError::ModelUnavailable("no enabled, available model found".into()))?;

        let provider = self
            .providers
            .get(&model.provider)
            .cloned()
            .ok_or_else(|| {
                LLMError::ModelUnavailable(format!(
                    "selected model's provider '{}' is not registered",
                    model.provider
                ))
            })?;

        Ok((provider, model.name))
    }

    /// System+user prompt completion using whichever model the registry selects.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ChatResponse, LLMError> {
        let (provider, model) = self.pick_provider()?;
        let response = provider.complete(system_prompt, user_prompt).await?;
        self.registry
            .record_use(provider.provider_name(), &model, Utc::now());
        Ok(response)
    }

    /// Multi-turn chat using whichever model the registry selects.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, LLMError> {
        let (provider, model) = self.pick_provider()?;
        let response = provider.chat(messages).await?;
        self.registry
            .record_use(provider.provider_name(), &model, Utc::now());
        Ok(response)
    }

    /// Context window of whichever model would currently be selected, when
    /// known. Callers use this to size chunking decisions ahead of a call.
    pub fn current_context_window(&self) -> Option<u32> {
        self.registry.select(&self.preference.0)?.context_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelRecord;
    use async_trait::async_trait;

    struct EchoProvider;

    #[async_trait]
    impl ChatProvider for EchoProvider {
        fn provider_name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            _system_prompt: &str,
            user_prompt: &str,
        ) -> Result<ChatResponse, LLMError> {
            Ok(ChatResponse {
                content: user_prompt.to_string(),
                provider: "echo".into(),
                model: "echo-1".into(),
                usage: None,
            })
        }

        async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, LLMError> {
            Ok(ChatResponse {
                content: messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                provider: "echo".into(),
                model: "echo-1".into(),
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn completes_with_selected_model_and_records_usage() {
        let registry = Arc::new(ModelRegistry::new());
        registry.replace_provider_models("echo", vec![ModelRecord::new("echo", "echo-1")]);

        let mut gateway = Gateway::new(registry.clone());
        gateway.register_provider("echo", Arc::new(EchoProvider));

        let response = gateway.complete("sys", "hello").await.unwrap();
        assert_eq!(response.content, "hello");

        let model = registry.all().into_iter().next().unwrap();
        assert_eq!(model.usage_count, 1);
    }

    #[tokio::test]
    async fn errors_when_no_model_is_selectable() {
        let registry = Arc::new(ModelRegistry::new());
        let gateway = Gateway::new(registry);
        let err = gateway.complete("sys", "hello").await.unwrap_err();
        assert!(matches!(err, LLMError::ModelUnavailable(_)));
    }
}
