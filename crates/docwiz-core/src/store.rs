//! Two-tier entity store tying the hot cache and durable store together,
//! and the per-session locking discipline from spec §5 ("fine-grained
//! locking per session id; global structures use atomic CAS or
//! single-writer lanes").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::conversation::ConversationMessage;
use crate::durable::DurableStore;
use crate::error::{EngineError, EngineResult};
use crate::file::File;
use crate::hot_cache::HotCache;
use crate::prompt::{Prompt, PromptId};
use crate::queue::Job;
use crate::result::ResultRecord;
use crate::session::{Session, SessionId, SessionStatus};

/// Owns the hot cache, the durable store, and one lock per session id —
/// never a single global mutex over all sessions (spec §5).
pub struct EngineStore {
    hot: HotCache,
    durable: DurableStore,
    session_locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl EngineStore {
    pub fn new(durable: DurableStore, conversation_ttl_secs: i64) -> Self {
        Self {
            hot: HotCache::new(Duration::from_secs(conversation_ttl_secs.max(0) as u64)),
            durable,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, session_id: SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // --- sessions ---

    pub async fn create_session(
        &self,
        user_id: Option<String>,
        metadata: Option<serde_json::Value>,
        ttl_secs: i64,
    ) -> EngineResult<Session> {
        let session = Session::new(user_id, metadata, ttl_secs);
        self.durable.put_session(session.clone()).await?;
        self.hot.put_session(session.clone()).await;
        Ok(session)
    }

    pub async fn get_session(&self, id: SessionId) -> EngineResult<Option<Session>> {
        if let Some(s) = self.hot.get_session(id).await {
            return Ok(Some(s));
        }
        match self.durable.get_session(id).await? {
            Some(s) => {
                self.hot.refresh_session(s.clone()).await;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    pub async fn require_session(&self, id: SessionId) -> EngineResult<Session> {
        self.get_session(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("session {id} not found")))
    }

    /// Applies a status transition, refusing illegal edges, and writes both
    /// tiers (spec §4.1 `updateStatus`).
    pub async fn update_status(&self, id: SessionId, status: SessionStatus) -> EngineResult<Session> {
        let _guard = self.lock_for(id).await.lock_owned().await;
        let mut session = self.require_session(id).await?;
        session.transition(status)?;
        self.durable.put_session(session.clone()).await?;
        self.hot.put_session(session.clone()).await;
        Ok(session)
    }

    pub async fn extend(&self, id: SessionId, seconds: i64) -> EngineResult<Session> {
        let _guard = self.lock_for(id).await.lock_owned().await;
        let mut session = self.require_session(id).await?;
        session.expires_at += chrono::Duration::seconds(seconds);
        self.durable.put_session(session.clone()).await?;
        self.hot.extend_session(id, seconds).await;
        Ok(session)
    }

    /// Evicts hot keys and marks the durable row EXPIRED; never physically
    /// deletes durable rows (spec §4.1 `delete`).
    pub async fn delete_session(&self, id: SessionId) -> EngineResult<()> {
        let _guard = self.lock_for(id).await.lock_owned().await;
        if let Some(mut session) = self.durable.get_session(id).await? {
            if session.status.can_transition_to(SessionStatus::Expired) {
                session.status = SessionStatus::Expired;
                self.durable.put_session(session).await?;
            }
        }
        self.hot.evict_session(id).await;
        Ok(())
    }

    /// Scans the durable store for rows past TTL and deletes each (spec
    /// §4.1 `cleanupExpired`).
    pub async fn cleanup_expired(&self) -> EngineResult<Vec<SessionId>> {
        let ids = self.durable.scan_expired(Utc::now()).await?;
        for id in &ids {
            self.delete_session(*id).await?;
        }
        Ok(ids)
    }

    pub async fn active_session_count(&self) -> usize {
        self.hot.active_session_count().await
    }

    // --- files ---

    pub async fn add_files(&self, session_id: SessionId, files: Vec<File>) -> EngineResult<()> {
        for file in &files {
            self.durable.put_file(file.clone()).await?;
        }
        let mut current = self.hot.get_files(session_id).await.unwrap_or_default();
        current.extend(files);
        self.hot.put_files(session_id, current).await;
        Ok(())
    }

    pub async fn list_files(&self, session_id: SessionId) -> EngineResult<Vec<File>> {
        if let Some(files) = self.hot.get_files(session_id).await {
            return Ok(files);
        }
        let files = self.durable.list_files(session_id).await?;
        self.hot.put_files(session_id, files.clone()).await;
        Ok(files)
    }

    // --- prompts ---

    pub async fn add_prompts(&self, session_id: SessionId, prompts: Vec<Prompt>) -> EngineResult<()> {
        self.durable.put_prompts(prompts.clone()).await?;
        let mut current = self.hot.get_prompts(session_id).await.unwrap_or_default();
        current.extend(prompts);
        self.hot.put_prompts(session_id, current).await;
        Ok(())
    }

    pub async fn list_prompts(&self, session_id: SessionId) -> EngineResult<Vec<Prompt>> {
        if let Some(prompts) = self.hot.get_prompts(session_id).await {
            return Ok(prompts);
        }
        let prompts = self.durable.list_prompts(session_id).await?;
        self.hot.put_prompts(session_id, prompts.clone()).await;
        Ok(prompts)
    }

    pub async fn get_prompt(&self, session_id: SessionId, prompt_id: Uuid) -> EngineResult<Prompt> {
        self.list_prompts(session_id)
            .await?
            .into_iter()
            .find(|p| p.id == prompt_id)
            .ok_or_else(|| EngineError::NotFound(format!("prompt {prompt_id} not found")))
    }

    pub async fn update_prompt(&self, prompt: Prompt) -> EngineResult<()> {
        self.durable.put_prompt(prompt.clone()).await?;
        self.hot.update_prompt(prompt.session_id, prompt).await;
        Ok(())
    }

    /// Marks a still-pending prompt `SKIPPED` and drops its queue job.
    ///
    /// Reserved for operator tooling; the Scheduler and Executor never call
    /// this on their own (spec §9: SKIPPED is a reachable status with no
    /// automatic producer).
    pub async fn operator_skip_prompt(&self, session_id: SessionId, prompt_id: Uuid) -> EngineResult<Prompt> {
        let mut prompt = self.get_prompt(session_id, prompt_id).await?;
        if prompt.status != crate::prompt::PromptStatus::Pending {
            return Err(EngineError::Validation(format!(
                "prompt {prompt_id} is not pending, cannot be skipped"
            )));
        }
        prompt.status = crate::prompt::PromptStatus::Skipped;
        self.update_prompt(prompt.clone()).await?;
        self.remove_job(session_id, prompt_id).await?;
        Ok(prompt)
    }

    // --- conversation ---

    pub async fn append_message(
        &self,
        session_id: SessionId,
        message: ConversationMessage,
    ) -> EngineResult<ConversationMessage> {
        self.durable.append_message(message.clone()).await?;
        self.hot.append_message(session_id, message.clone()).await;
        Ok(message)
    }

    pub async fn list_messages(&self, session_id: SessionId) -> EngineResult<Vec<ConversationMessage>> {
        let hot = self.hot.get_messages(session_id).await;
        if !hot.is_empty() {
            return Ok(hot);
        }
        let messages = self.durable.list_messages(session_id).await?;
        for m in &messages {
            self.hot.append_message(session_id, m.clone()).await;
        }
        Ok(messages)
    }

    /// Next monotonic sequence number for a session's conversation log.
    pub async fn next_sequence(&self, session_id: SessionId) -> EngineResult<u64> {
        Ok(self.list_messages(session_id).await?.len() as u64)
    }

    // --- results ---

    pub async fn add_result(&self, session_id: SessionId, result: ResultRecord) -> EngineResult<ResultRecord> {
        self.durable.put_result(result.clone()).await?;
        self.hot.append_result(session_id, result.clone()).await;
        Ok(result)
    }

    pub async fn update_result(&self, session_id: SessionId, result: ResultRecord) -> EngineResult<()> {
        self.durable.put_result(result.clone()).await?;
        self.hot.update_result(session_id, result).await;
        Ok(())
    }

    pub async fn list_results(&self, session_id: SessionId) -> EngineResult<Vec<ResultRecord>> {
        let hot = self.hot.get_results(session_id).await;
        if !hot.is_empty() {
            return Ok(hot);
        }
        let results = self.durable.list_results(session_id).await?;
        for r in &results {
            self.hot.append_result(session_id, r.clone()).await;
        }
        Ok(results)
    }

    pub async fn latest_version(&self, session_id: SessionId) -> EngineResult<u32> {
        Ok(self
            .list_results(session_id)
            .await?
            .iter()
            .map(|r| r.version)
            .max()
            .unwrap_or(0))
    }

    // --- queue jobs (durable only; the live heap lives in `PriorityQueue`) ---

    pub async fn persist_job(&self, job: Job) -> EngineResult<()> {
        self.durable.put_job(job).await
    }

    pub async fn remove_job(&self, session_id: SessionId, prompt_id: PromptId) -> EngineResult<()> {
        self.durable.remove_job(session_id, prompt_id).await
    }

    /// All jobs not yet popped, for rebuilding the in-memory heap on startup
    /// (spec §4.3: "queue contents survive a process restart").
    pub async fn load_jobs(&self) -> EngineResult<Vec<Job>> {
        self.durable.list_jobs().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> EngineStore {
        EngineStore::new(DurableStore::in_memory().await.unwrap(), 86_400)
    }

    #[tokio::test]
    async fn create_then_get_round_trips_through_hot_tier() {
        let store = store().await;
        let session = store.create_session(None, None, 3600).await.unwrap();
        let loaded = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(store.active_session_count().await, 1);
    }

    #[tokio::test]
    async fn delete_evicts_hot_but_keeps_durable_row_expired() {
        let store = store().await;
        let session = store.create_session(None, None, 3600).await.unwrap();
        store.delete_session(session.id).await.unwrap();

        assert_eq!(store.active_session_count().await, 0);
        let durable = store.durable.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(durable.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn illegal_status_transition_is_refused() {
        let store = store().await;
        let session = store.create_session(None, None, 3600).await.unwrap();
        store
            .update_status(session.id, SessionStatus::Processing)
            .await
            .unwrap();
        store
            .update_status(session.id, SessionStatus::Completed)
            .await
            .unwrap();
        assert!(
            store
                .update_status(session.id, SessionStatus::Active)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn operator_skip_prompt_marks_skipped_and_drops_its_job() {
        use crate::prompt::{PromptInput, PromptStatus, TargetType, build_batch};
        use crate::queue::Job;

        let store = store().await;
        let session = store.create_session(None, None, 3600).await.unwrap();
        let prompts = build_batch(
            session.id,
            vec![PromptInput {
                content: "draft a summary".into(),
                priority: 0,
                target_type: TargetType::Global,
                target_file_id: None,
                target_lines: None,
                target_section: None,
            }],
        )
        .unwrap();
        let prompt_id = prompts[0].id;
        store.add_prompts(session.id, prompts.clone()).await.unwrap();
        store
            .persist_job(Job {
                session_id: session.id,
                prompt_id,
                priority: 0,
                sequence: 0,
            })
            .await
            .unwrap();

        let skipped = store.operator_skip_prompt(session.id, prompt_id).await.unwrap();
        assert_eq!(skipped.status, PromptStatus::Skipped);

        let reloaded = store.get_prompt(session.id, prompt_id).await.unwrap();
        assert_eq!(reloaded.status, PromptStatus::Skipped);
        assert!(store.load_jobs().await.unwrap().is_empty());

        assert!(store.operator_skip_prompt(session.id, prompt_id).await.is_err());
    }
}
