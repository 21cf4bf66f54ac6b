//! Hot tier: in-process, TTL-tracked caches queried before the durable
//! store (spec §4.1). Grounded on the teacher's in-memory session store
//! shape plus the staleness-check pattern from its MCP cache
//! (`is_stale`/`last_refreshed` comparisons), generalized to a handful of
//! keyed maps instead of one.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::conversation::ConversationMessage;
use crate::file::File;
use crate::prompt::Prompt;
use crate::result::ResultRecord;
use crate::session::{Session, SessionId};

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        self.expires_at < now
    }
}

/// Per-session hot-tier state, covering every key listed in spec §6's
/// "Persisted layout" (`session:{id}`, `:files`, `:prompts`,
/// `:conversations`, `:result`), plus `sessions:active` and
/// `queue:processing` at the top level.
#[derive(Default)]
struct HotState {
    sessions: HashMap<SessionId, Entry<Session>>,
    files: HashMap<SessionId, Vec<File>>,
    prompts: HashMap<SessionId, Vec<Prompt>>,
    conversations: HashMap<SessionId, Vec<ConversationMessage>>,
    results: HashMap<SessionId, Vec<ResultRecord>>,
    active_sessions: HashSet<SessionId>,
}

pub struct HotCache {
    state: Mutex<HotState>,
    default_ttl: Duration,
}

impl HotCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(HotState::default()),
            default_ttl,
        }
    }

    pub async fn put_session(&self, session: Session) {
        let mut state = self.state.lock().await;
        state.active_sessions.insert(session.id);
        state
            .sessions
            .insert(session.id, Entry::new(session, self.default_ttl));
    }

    pub async fn get_session(&self, id: SessionId) -> Option<Session> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let stale = state.sessions.get(&id).map(|e| e.is_stale(now)).unwrap_or(true);
        if stale {
            state.sessions.remove(&id);
            return None;
        }
        state.sessions.get(&id).map(|e| e.value.clone())
    }

    /// Refreshes the hot entry for a session loaded from the durable tier,
    /// with the session's own remaining TTL (spec §4.1 `getSession`: "on
    /// hot miss, load from durable and refresh hot with remaining TTL").
    pub async fn refresh_session(&self, session: Session) {
        let remaining = (session.expires_at - chrono::Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let mut state = self.state.lock().await;
        state.active_sessions.insert(session.id);
        state.sessions.insert(session.id, Entry::new(session, remaining));
    }

    pub async fn extend_session(&self, id: SessionId, seconds: i64) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.sessions.get_mut(&id) {
            entry.value.expires_at += chrono::Duration::seconds(seconds);
            entry.expires_at = Instant::now() + self.default_ttl;
        }
    }

    /// Evicts every hot key for a session (spec §4.1 `delete`).
    pub async fn evict_session(&self, id: SessionId) {
        let mut state = self.state.lock().await;
        state.sessions.remove(&id);
        state.files.remove(&id);
        state.prompts.remove(&id);
        state.conversations.remove(&id);
        state.results.remove(&id);
        state.active_sessions.remove(&id);
    }

    pub async fn active_session_count(&self) -> usize {
        self.state.lock().await.active_sessions.len()
    }

    pub async fn active_session_ids(&self) -> Vec<SessionId> {
        self.state.lock().await.active_sessions.iter().copied().collect()
    }

    pub async fn put_files(&self, session_id: SessionId, files: Vec<File>) {
        self.state.lock().await.files.insert(session_id, files);
    }

    pub async fn get_files(&self, session_id: SessionId) -> Option<Vec<File>> {
        self.state.lock().await.files.get(&session_id).cloned()
    }

    pub async fn put_prompts(&self, session_id: SessionId, prompts: Vec<Prompt>) {
        self.state.lock().await.prompts.insert(session_id, prompts);
    }

    pub async fn get_prompts(&self, session_id: SessionId) -> Option<Vec<Prompt>> {
        self.state.lock().await.prompts.get(&session_id).cloned()
    }

    pub async fn update_prompt(&self, session_id: SessionId, prompt: Prompt) {
        let mut state = self.state.lock().await;
        if let Some(list) = state.prompts.get_mut(&session_id) {
            if let Some(existing) = list.iter_mut().find(|p| p.id == prompt.id) {
                *existing = prompt;
                return;
            }
            list.push(prompt);
        } else {
            state.prompts.insert(session_id, vec![prompt]);
        }
    }

    pub async fn append_message(&self, session_id: SessionId, message: ConversationMessage) {
        self.state
            .lock()
            .await
            .conversations
            .entry(session_id)
            .or_default()
            .push(message);
    }

    pub async fn get_messages(&self, session_id: SessionId) -> Vec<ConversationMessage> {
        self.state
            .lock()
            .await
            .conversations
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn append_result(&self, session_id: SessionId, result: ResultRecord) {
        self.state
            .lock()
            .await
            .results
            .entry(session_id)
            .or_default()
            .push(result);
    }

    pub async fn update_result(&self, session_id: SessionId, result: ResultRecord) {
        let mut state = self.state.lock().await;
        if let Some(list) = state.results.get_mut(&session_id) {
            if let Some(existing) = list.iter_mut().find(|r| r.id == result.id) {
                *existing = result;
            }
        }
    }

    pub async fn get_results(&self, session_id: SessionId) -> Vec<ResultRecord> {
        self.state
            .lock()
            .await
            .results
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }
}
