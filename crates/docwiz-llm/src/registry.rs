//! In-memory model registry with an optional on-disk JSON cache.
//!
//! Selection picks the lowest-`priority` model among those currently
//! `is_selectable()`, breaking ties by highest `usage_count` (prefer a
//! model that's already warm). The registry keeps a per-provider
//! "last refreshed" timestamp so callers can decide whether a model list
//! needs to be re-fetched from the provider before selecting from it.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::LLMError;
use crate::model::ModelRecord;

/// How long a provider's fetched model list is considered fresh.
pub const MODEL_CACHE_TTL_MS: i64 = 5 * 60 * 1000;

#[derive(Default)]
struct RegistryState {
    models: Vec<ModelRecord>,
    last_refreshed: HashMap<String, DateTime<Utc>>,
}

/// Tracks known models and the bookkeeping needed to select and refresh them.
pub struct ModelRegistry {
    state: RwLock<RegistryState>,
    cache_path: Option<PathBuf>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            cache_path: None,
        }
    }

    /// Registry backed by a JSON file; existing contents are loaded eagerly.
    pub fn with_cache_file(path: impl Into<PathBuf>) -> Result<Self, LLMError> {
        let path = path.into();
        let mut registry = Self::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| LLMError::ProviderError(format!("reading model cache: {e}")))?;
            let models: Vec<ModelRecord> = serde_json::from_str(&raw)?;
            registry.state.get_mut().unwrap().models = models;
        }
        registry.cache_path = Some(path);
        Ok(registry)
    }

    /// Replaces all models belonging to `provider` and marks it as just
    /// refreshed. Call this after a successful provider list-models fetch.
    pub fn replace_provider_models(&self, provider: &str, models: Vec<ModelRecord>) {
        let mut state = self.state.write().unwrap();
        state.models.retain(|m| m.provider != provider);
        state.models.extend(models);
        state.last_refreshed.insert(provider.to_string(), Utc::now());
        drop(state);
        self.persist();
    }

    /// Whether `provider`'s model list was refreshed within the cache TTL.
    pub fn is_fresh(&self, provider: &str, now: DateTime<Utc>) -> bool {
        let state = self.state.read().unwrap();
        match state.last_refreshed.get(provider) {
            Some(ts) => (now - *ts).num_milliseconds() < MODEL_CACHE_TTL_MS,
            None => false,
        }
    }

    /// Picks the best selectable model, optionally restricted to a preferred
    /// ordering of provider names (first preferred provider with at least
    /// one selectable model wins; otherwise any selectable model anywhere).
    pub fn select(&self, preferred_providers: &[String]) -> Option<ModelRecord> {
        let state = self.state.read().unwrap();

        for provider in preferred_providers {
            if let Some(m) = Self::best_of(state.models.iter().filter(|m| &m.provider == provider)) {
                return Some(m.clone());
            }
        }

        Self::best_of(state.models.iter()).cloned()
    }

    fn best_of<'a>(iter: impl Iterator<Item = &'a ModelRecord>) -> Option<&'a ModelRecord> {
        iter.filter(|m| m.is_selectable())
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.usage_count.cmp(&a.usage_count))
            })
    }

    /// Records that `provider`/`model` just served a completion.
    pub fn record_use(&self, provider: &str, model: &str, at: DateTime<Utc>) {
        let mut state = self.state.write().unwrap();
        if let Some(m) = state
            .models
            .iter_mut()
            .find(|m| m.provider == provider && m.name == model)
        {
            m.record_use(at);
        }
        drop(state);
        self.persist();
    }

    pub fn all(&self) -> Vec<ModelRecord> {
        self.state.read().unwrap().models.clone()
    }

    fn persist(&self) {
        let Some(path) = &self.cache_path else {
            return;
        };
        let models = self.state.read().unwrap().models.clone();
        if let Err(e) = Self::write_cache(path, &models) {
            log::warn!("failed to persist model registry cache: {e}");
        }
    }

    fn write_cache(path: &Path, models: &[ModelRecord]) -> Result<(), LLMError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LLMError::ProviderError(format!("creating cache dir: {e}")))?;
        }
        let raw = serde_json::to_string_pretty(models)?;
        std::fs::write(path, raw)
            .map_err(|e| LLMError::ProviderError(format!("writing model cache: {e}")))?;
        Ok(())
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(provider: &str, name: &str, priority: i32, usage: u64) -> ModelRecord {
        let mut m = ModelRecord::new(provider, name);
        m.priority = priority;
        m.usage_count = usage;
        m
    }

    #[test]
    fn selects_lowest_priority_among_selectable() {
        let reg = ModelRegistry::new();
        reg.replace_provider_models(
            "openai",
            vec![model("openai", "a", 5, 0), model("openai", "b", 1, 0)],
        );
        let picked = reg.select(&[]).unwrap();
        assert_eq!(picked.name, "b");
    }

    #[test]
    fn ties_break_on_usage_count_descending() {
        let reg = ModelRegistry::new();
        reg.replace_provider_models(
            "openai",
            vec![model("openai", "a", 1, 3), model("openai", "b", 1, 9)],
        );
        let picked = reg.select(&[]).unwrap();
        assert_eq!(picked.name, "b");
    }

    #[test]
    fn disabled_or_unavailable_models_are_skipped() {
        let reg = ModelRegistry::new();
        let mut disabled = model("openai", "a", 0, 0);
        disabled.is_enabled = false;
        reg.replace_provider_models("openai", vec![disabled, model("openai", "b", 9, 0)]);
        let picked = reg.select(&[]).unwrap();
        assert_eq!(picked.name, "b");
    }

    #[test]
    fn preferred_provider_order_is_honored() {
        let reg = ModelRegistry::new();
        reg.replace_provider_models("ollama", vec![model("ollama", "local", 0, 0)]);
        reg.replace_provider_models("openai", vec![model("openai", "cloud", 0, 0)]);
        let picked = reg
            .select(&["openai".to_string(), "ollama".to_string()])
            .unwrap();
        assert_eq!(picked.provider, "openai");
    }

    #[test]
    fn no_selectable_model_returns_none() {
        let reg = ModelRegistry::new();
        let mut m = model("openai", "a", 0, 0);
        m.is_available = false;
        reg.replace_provider_models("openai", vec![m]);
        assert!(reg.select(&[]).is_none());
    }
}
