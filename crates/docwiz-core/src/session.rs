//! Session entity and its status transition DAG (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

pub type SessionId = Uuid;

/// Session lifecycle status. Transitions form a DAG (spec §3):
/// `ACTIVE -> PROCESSING -> {COMPLETED|FAILED}`, and any status `-> EXPIRED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl SessionStatus {
    /// Whether `self -> next` is a legal edge in the transition DAG.
    ///
    /// `COMPLETED|FAILED -> PROCESSING` is the one edge added beyond the
    /// base ACTIVE->PROCESSING->{COMPLETED|FAILED} chain: REGENERATE
    /// deliberately re-enters a finished session (spec §4.9), which the
    /// base DAG as stated would otherwise forbid.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (_, Expired) => true,
            (Active, Processing) => true,
            (Completed, Processing) | (Failed, Processing) => true,
            (Processing, Completed) | (Processing, Failed) => true,
            (same, next) if same == next => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub metadata: Value,
}

impl Session {
    pub fn new(user_id: Option<String>, metadata: Option<Value>, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: SessionStatus::Active,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_secs),
            metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
        }
    }

    /// Applies a transition, refusing an illegal edge per the DAG invariant.
    pub fn transition(&mut self, next: SessionStatus) -> EngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::Validation(format!(
                "illegal session status transition {:?} -> {:?}",
                self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_to_processing_is_legal() {
        let mut s = Session::new(None, None, 3600);
        assert!(s.transition(SessionStatus::Processing).is_ok());
    }

    #[test]
    fn completed_to_active_is_illegal() {
        let mut s = Session::new(None, None, 3600);
        s.transition(SessionStatus::Processing).unwrap();
        s.transition(SessionStatus::Completed).unwrap();
        assert!(s.transition(SessionStatus::Active).is_err());
    }

    #[test]
    fn any_status_can_expire() {
        let mut s = Session::new(None, None, 3600);
        assert!(s.transition(SessionStatus::Expired).is_ok());
    }
}
