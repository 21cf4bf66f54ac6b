//! Model registry entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single model known to the registry, along with the bookkeeping the
/// selection algorithm needs (availability, priority, usage history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Provider-local model identifier, e.g. "gpt-4o-mini".
    pub name: String,
    /// Human-friendly name for display purposes.
    pub display_name: String,
    /// Name of the owning provider, e.g. "openai".
    pub provider: String,
    /// Approximate on-disk or parameter size in bytes, when known.
    pub size: Option<u64>,
    /// Model family, e.g. "llama3", "gpt-4".
    pub family: Option<String>,
    /// Parameter count descriptor, e.g. "8B".
    pub parameter_size: Option<String>,
    /// Quantization scheme, e.g. "Q4_K_M".
    pub quantization: Option<String>,
    /// Whether the provider currently reports this model as reachable.
    pub is_available: bool,
    /// Whether an operator has enabled this model for selection.
    pub is_enabled: bool,
    /// Lower values are preferred by the selection algorithm.
    pub priority: i32,
    /// Maximum context window in tokens, when known.
    pub context_window: Option<u32>,
    /// Default max output tokens for this model.
    pub max_tokens: Option<u32>,
    /// Default sampling temperature for this model.
    pub temperature: Option<f32>,
    /// Last time availability was checked against the provider.
    pub last_checked: Option<DateTime<Utc>>,
    /// Last time this model was actually used to serve a completion.
    pub last_used: Option<DateTime<Utc>>,
    /// Number of completions served by this model so far.
    pub usage_count: u64,
}

impl ModelRecord {
    pub fn new(provider: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            provider: provider.into(),
            size: None,
            family: None,
            parameter_size: None,
            quantization: None,
            is_available: true,
            is_enabled: true,
            priority: 0,
            context_window: None,
            max_tokens: None,
            temperature: None,
            last_checked: None,
            last_used: None,
            usage_count: 0,
        }
    }

    /// Eligible for selection: reported available and operator-enabled.
    pub fn is_selectable(&self) -> bool {
        self.is_available && self.is_enabled
    }

    /// Records that this model just served a completion.
    pub fn record_use(&mut self, at: DateTime<Utc>) {
        self.usage_count += 1;
        self.last_used = Some(at);
    }
}
