//! Real-time pub/sub surface (spec §6), grounded on the teacher's
//! broadcast-channel event bus (`crates/agent/src/event_bus.rs`) with the
//! coding-agent-specific payloads replaced by this spec's five event kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::SessionId;

const EVENT_BUS_BUFFER: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEventKind {
    Progress { percent: u8 },
    ModelResult { prompt_id: uuid::Uuid, tokens_used: Option<u32> },
    Clarification { message_id: uuid::Uuid },
    Completed,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EngineEventKind,
}

/// Per-engine broadcast sender. Subscribers subscribe by session id by
/// filtering the shared stream (spec §6: "Subscribers subscribe by session
/// id").
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, session_id: SessionId, kind: EngineEventKind) {
        // No receivers is not an error: the pub/sub surface is best-effort.
        let _ = self.sender.send(EngineEvent {
            session_id,
            timestamp: Utc::now(),
            kind,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
