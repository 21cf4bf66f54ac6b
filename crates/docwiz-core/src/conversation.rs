//! Append-only conversation log (spec §3, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::session::SessionId;

pub type MessageId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    General,
    Clarification,
    Modification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub message_type: MessageType,
    pub role: Role,
    pub content: String,
    pub context: Option<Value>,
    pub parent_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    /// Monotonic insertion counter, breaking ties when `created_at` collides
    /// at timestamp resolution (spec §5: "conversation messages preserve
    /// creation order strictly via a monotonic timestamp plus insertion
    /// counter").
    pub sequence: u64,
}

impl ConversationMessage {
    pub fn new(
        session_id: SessionId,
        message_type: MessageType,
        role: Role,
        content: impl Into<String>,
        context: Option<Value>,
        parent_id: Option<MessageId>,
        sequence: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            message_type,
            role,
            content: content.into(),
            context,
            parent_id,
            created_at: Utc::now(),
            sequence,
        }
    }

    /// Whether this ASSISTANT CLARIFICATION is still awaiting a reply,
    /// given the full set of messages in its session (spec §3: pending iff
    /// no child exists with role=USER, or role=SYSTEM with
    /// `{resolved:true}`).
    pub fn is_pending_clarification(&self, all: &[ConversationMessage]) -> bool {
        if self.message_type != MessageType::Clarification || self.role != Role::Assistant {
            return false;
        }
        !all.iter().any(|m| {
            m.parent_id == Some(self.id)
                && (m.role == Role::User
                    || (m.role == Role::System
                        && m.context
                            .as_ref()
                            .and_then(|c| c.get("resolved"))
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_until_user_reply_arrives() {
        let session_id = Uuid::new_v4();
        let question = ConversationMessage::new(
            session_id,
            MessageType::Clarification,
            Role::Assistant,
            "which value?",
            None,
            None,
            0,
        );
        assert!(question.is_pending_clarification(&[question.clone()]));

        let reply = ConversationMessage::new(
            session_id,
            MessageType::Clarification,
            Role::User,
            "use 150000",
            None,
            Some(question.id),
            1,
        );
        assert!(!question.is_pending_clarification(&[question.clone(), reply]));
    }

    #[test]
    fn resolved_system_marker_also_clears_pending() {
        let session_id = Uuid::new_v4();
        let question = ConversationMessage::new(
            session_id,
            MessageType::Clarification,
            Role::Assistant,
            "which value?",
            None,
            None,
            0,
        );
        let resolved = ConversationMessage::new(
            session_id,
            MessageType::Clarification,
            Role::System,
            "resolved by operator",
            Some(serde_json::json!({"resolved": true})),
            Some(question.id),
            1,
        );
        assert!(!question.is_pending_clarification(&[question.clone(), resolved]));
    }
}
