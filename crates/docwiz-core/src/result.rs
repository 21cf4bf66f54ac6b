//! Versioned result entity (spec §3, §4.9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::session::SessionId;

pub type ResultId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Draft,
    PendingConfirmation,
    Confirmed,
    Modified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: ResultId,
    pub session_id: SessionId,
    pub version: u32,
    pub content: String,
    pub format: String,
    pub status: ResultStatus,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn new(session_id: SessionId, version: u32, content: String, prompt_count: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            version,
            content,
            format: "markdown".into(),
            status: ResultStatus::PendingConfirmation,
            metadata: serde_json::json!({
                "promptCount": prompt_count,
                "generatedAt": now,
            }),
            created_at: now,
        }
    }
}

/// Action taken on a pending result (spec §4.9, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConfirmAction {
    Confirm,
    Modify,
    Regenerate,
}

/// Disambiguates the two `MODIFY` payload shapes (spec §9 Open Question 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModifyPayload {
    DirectEdit(String),
    NewPrompts(Vec<crate::prompt::PromptInput>),
}

impl ModifyPayload {
    /// Builds a `ModifyPayload` from the two optional wire fields, rejecting
    /// a caller that supplies both or neither (spec §9 Open Question 3:
    /// "if a caller supplies both simultaneously the engine must reject
    /// with a validation error").
    pub fn from_options(
        direct_edit: Option<String>,
        new_prompts: Option<Vec<crate::prompt::PromptInput>>,
    ) -> crate::error::EngineResult<Self> {
        match (direct_edit, new_prompts) {
            (Some(_), Some(_)) => Err(crate::error::EngineError::Validation(
                "modifyResult accepts either directEdit or newPrompts, not both".into(),
            )),
            (Some(text), None) => Ok(ModifyPayload::DirectEdit(text)),
            (None, Some(prompts)) => Ok(ModifyPayload::NewPrompts(prompts)),
            (None, None) => Err(crate::error::EngineError::Validation(
                "modifyResult requires either directEdit or newPrompts".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_both_payload_shapes_at_once() {
        let err = ModifyPayload::from_options(Some("text".into()), Some(vec![])).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Validation(_)));
    }

    #[test]
    fn rejects_neither_payload_shape() {
        assert!(ModifyPayload::from_options(None, None).is_err());
    }

    #[test]
    fn accepts_direct_edit_alone() {
        let payload = ModifyPayload::from_options(Some("edited".into()), None).unwrap();
        assert!(matches!(payload, ModifyPayload::DirectEdit(t) if t == "edited"));
    }
}
