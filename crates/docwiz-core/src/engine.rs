//! Engine facade (spec §6 "External interfaces"): the single entry point a
//! wizard-backend HTTP/WebSocket adapter would sit on top of. Grounded on
//! the teacher's top-level `querymt` client facade shape — one struct
//! owning the cooperating subsystems, with `start`/`shutdown` bracketing a
//! background scheduler task (spec §9 "bounded singleton").

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use docwiz_llm::Gateway;
use serde::Serialize;
use tracing::warn;

use crate::chunking::estimate_tokens;
use crate::config::EngineConfig;
use crate::conversation::{ConversationMessage, MessageType, Role};
use crate::durable::DurableStore;
use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::executor::Executor;
use crate::file::{File, Section, Table};
use crate::prompt::{PromptId, PromptInput, PromptStatus};
use crate::queue::PriorityQueue;
use crate::result::{ConfirmAction, ModifyPayload, ResultId, ResultRecord, ResultStatus};
use crate::scheduler::Scheduler;
use crate::session::{Session, SessionId, SessionStatus};
use crate::store::EngineStore;

/// Pre-parsed document input. Extraction happens outside this engine (spec
/// §1 non-goal); this is the `(plain_text, section_list, table_list)` shape
/// the engine is handed.
pub struct FileUpload {
    pub original_name: String,
    pub mime_type: String,
    pub plain_text: String,
    pub sections: Vec<Section>,
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedFileView {
    pub id: crate::file::FileId,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub token_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub session_id: SessionId,
    pub files: Vec<UploadedFileView>,
    pub token_estimate: u32,
    pub can_process: bool,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedPromptView {
    pub id: PromptId,
    pub content: String,
    pub priority: i32,
    pub target_type: crate::prompt::TargetType,
    pub execution_order: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitPromptsResult {
    pub prompts: Vec<SubmittedPromptView>,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptCounts {
    pub total: usize,
    pub completed: usize,
    pub processing: usize,
    pub pending: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub status: SessionStatus,
    pub progress: u8,
    pub prompts: PromptCounts,
    pub has_clarifications: bool,
    pub clarification_count: usize,
    pub has_result: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClarificationView {
    pub id: crate::conversation::MessageId,
    pub question: String,
    pub context: Option<serde_json::Value>,
    pub created_at: chrono::DateTime<Utc>,
}

/// Ties the Session/Prompt/File stores, the Priority Queue, the Scheduler,
/// and the event bus into one handle.
pub struct Engine {
    store: Arc<EngineStore>,
    scheduler: Arc<Scheduler>,
    executor: Arc<Executor>,
    events: Arc<crate::events::EventBus>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(durable: DurableStore, gateway: Arc<Gateway>, config: EngineConfig) -> Arc<Self> {
        let events = Arc::new(crate::events::EventBus::new());
        let store = Arc::new(EngineStore::new(durable, config.conversation_ttl_secs));
        let executor = Arc::new(Executor::new(
            store.clone(),
            gateway,
            config.clone(),
            events.clone(),
        ));
        let queue = Arc::new(PriorityQueue::new());
        let scheduler = Arc::new(Scheduler::new(
            queue,
            store.clone(),
            executor.clone(),
            config.max_concurrent_processing,
            config.graceful_shutdown_secs,
        ));
        Arc::new(Self {
            store,
            scheduler,
            executor,
            events,
            config,
        })
    }

    /// Restores any durably-queued jobs, then spawns the scheduler loop and
    /// the periodic expired-session sweep (spec §9 "init starts the
    /// scheduler task and the cleanup task").
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        self.scheduler.restore().await?;
        tokio::spawn(self.scheduler.clone().run());

        let store = self.store.clone();
        let scheduler = self.scheduler.clone();
        let interval = Duration::from_millis(self.config.cleanup_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match store.cleanup_expired().await {
                    Ok(expired) if !expired.is_empty() => {
                        for session_id in &expired {
                            if let Err(e) = scheduler.cancel_session(*session_id).await {
                                warn!(%session_id, error = %e, "failed to cancel queued jobs for expired session");
                            }
                        }
                        tracing::info!(count = expired.len(), "swept expired sessions");
                    }
                    Err(e) => warn!(error = %e, "expired-session sweep failed"),
                    _ => {}
                }
            }
        });
        Ok(())
    }

    /// Stops dequeuing new jobs and waits for in-flight executors to drain
    /// (spec §9 "shutdown drains in-flight executors up to a
    /// graceful-shutdown window and then cancels").
    pub async fn shutdown(&self) {
        self.scheduler.shutdown(self.config.max_concurrent_processing).await;
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // --- upload / files ---

    pub async fn upload(
        &self,
        user_id: Option<String>,
        uploads: Vec<FileUpload>,
        metadata: Option<serde_json::Value>,
    ) -> EngineResult<UploadResult> {
        let session = self
            .store
            .create_session(user_id, metadata, self.config.session_ttl_secs)
            .await?;

        let files: Vec<File> = uploads
            .into_iter()
            .map(|u| File::new(session.id, u.original_name, u.mime_type, u.plain_text, u.sections, u.tables))
            .collect();
        self.store.add_files(session.id, files.clone()).await?;

        let token_estimate = files.iter().map(|f| f.token_estimate).sum();
        let file_views = files
            .iter()
            .map(|f| UploadedFileView {
                id: f.id,
                filename: f.original_name.clone(),
                mime_type: f.mime_type.clone(),
                size: f.size,
                token_count: f.token_estimate,
            })
            .collect();

        Ok(UploadResult {
            session_id: session.id,
            files: file_views,
            token_estimate,
            can_process: true,
            expires_at: session.expires_at,
        })
    }

    // --- prompts ---

    pub async fn submit_prompts(
        &self,
        session_id: SessionId,
        inputs: Vec<PromptInput>,
    ) -> EngineResult<SubmitPromptsResult> {
        self.store.require_session(session_id).await?;
        let prompts = crate::prompt::build_batch(session_id, inputs)?;
        self.store.add_prompts(session_id, prompts.clone()).await?;
        self.scheduler.schedule_batch(session_id, &prompts).await?;

        let views = prompts
            .iter()
            .map(|p| SubmittedPromptView {
                id: p.id,
                content: p.content.clone(),
                priority: p.priority,
                target_type: p.target_type,
                execution_order: p.execution_order,
            })
            .collect();

        Ok(SubmitPromptsResult {
            prompts: views,
            status: "queued",
        })
    }

    // --- status / conversation ---

    pub async fn status(&self, session_id: SessionId) -> EngineResult<StatusView> {
        let session = self.store.require_session(session_id).await?;
        let prompts = self.store.list_prompts(session_id).await?;
        let messages = self.store.list_messages(session_id).await?;
        let results = self.store.list_results(session_id).await?;

        let counts = PromptCounts {
            total: prompts.len(),
            completed: prompts.iter().filter(|p| p.status == PromptStatus::Completed).count(),
            processing: prompts.iter().filter(|p| p.status == PromptStatus::Processing).count(),
            pending: prompts.iter().filter(|p| p.status == PromptStatus::Pending).count(),
            failed: prompts.iter().filter(|p| p.status == PromptStatus::Failed).count(),
        };
        let progress = if counts.total == 0 {
            0
        } else {
            ((counts.completed as f64 / counts.total as f64) * 100.0).round() as u8
        };

        let pending_clarifications: Vec<&ConversationMessage> = messages
            .iter()
            .filter(|m| m.is_pending_clarification(&messages))
            .collect();

        Ok(StatusView {
            status: session.status,
            progress,
            prompts: counts,
            has_clarifications: !pending_clarifications.is_empty(),
            clarification_count: pending_clarifications.len(),
            has_result: !results.is_empty(),
        })
    }

    pub async fn conversation(
        &self,
        session_id: SessionId,
        limit: Option<usize>,
    ) -> EngineResult<Vec<ConversationMessage>> {
        self.store.require_session(session_id).await?;
        let mut messages = self.store.list_messages(session_id).await?;
        if let Some(limit) = limit {
            let start = messages.len().saturating_sub(limit);
            messages = messages.split_off(start);
        }
        Ok(messages)
    }

    pub async fn session(&self, session_id: SessionId) -> EngineResult<Session> {
        self.store.require_session(session_id).await
    }

    pub async fn delete_session(&self, session_id: SessionId) -> EngineResult<()> {
        self.scheduler.cancel_session(session_id).await?;
        self.store.delete_session(session_id).await
    }

    // --- clarifications ---

    pub async fn clarifications(&self, session_id: SessionId) -> EngineResult<Vec<ClarificationView>> {
        let messages = self.store.list_messages(session_id).await?;
        Ok(messages
            .iter()
            .filter(|m| m.is_pending_clarification(&messages))
            .map(|m| ClarificationView {
                id: m.id,
                question: m.content.clone(),
                context: m.context.clone(),
                created_at: m.created_at,
            })
            .collect())
    }

    /// Appends a child USER reply, which is how a pending clarification is
    /// resolved from the caller side (spec §4.8 `respondToClarification`).
    pub async fn respond_to_clarification(
        &self,
        session_id: SessionId,
        clarification_id: crate::conversation::MessageId,
        response: String,
    ) -> EngineResult<()> {
        let messages = self.store.list_messages(session_id).await?;
        let question = messages
            .iter()
            .find(|m| m.id == clarification_id)
            .ok_or_else(|| EngineError::NotFound(format!("clarification {clarification_id} not found")))?;
        if question.message_type != MessageType::Clarification || question.role != Role::Assistant {
            return Err(EngineError::Validation(
                "clarification_id does not reference a pending ASSISTANT clarification".into(),
            ));
        }

        let sequence = self.store.next_sequence(session_id).await?;
        let reply = ConversationMessage::new(
            session_id,
            MessageType::Clarification,
            Role::User,
            response,
            None,
            Some(clarification_id),
            sequence,
        );
        self.store.append_message(session_id, reply).await?;
        self.reconcile(session_id).await
    }

    /// Operator-side resolution: appends SYSTEM `{resolved:true}` markers
    /// for each given clarification id without requiring a caller reply
    /// (spec §4.8 `markClarificationsResolved`).
    pub async fn mark_clarifications_resolved(
        &self,
        session_id: SessionId,
        ids: Vec<crate::conversation::MessageId>,
    ) -> EngineResult<()> {
        for id in ids {
            let sequence = self.store.next_sequence(session_id).await?;
            let marker = ConversationMessage::new(
                session_id,
                MessageType::Clarification,
                Role::System,
                "resolved by operator",
                Some(serde_json::json!({"resolved": true})),
                Some(id),
                sequence,
            );
            self.store.append_message(session_id, marker).await?;
        }
        self.reconcile(session_id).await
    }

    async fn reconcile(&self, session_id: SessionId) -> EngineResult<()> {
        self.executor.reconcile_session_status(session_id).await
    }

    // --- results ---

    pub async fn result(&self, session_id: SessionId, version: Option<u32>) -> EngineResult<ResultRecord> {
        let results = self.store.list_results(session_id).await?;
        match version {
            Some(v) => results
                .into_iter()
                .find(|r| r.version == v)
                .ok_or_else(|| EngineError::NotFound(format!("result version {v} not found"))),
            None => results
                .into_iter()
                .max_by_key(|r| r.version)
                .ok_or_else(|| EngineError::NotFound("session has no result yet".into())),
        }
    }

    pub async fn confirm_result(
        &self,
        session_id: SessionId,
        result_id: ResultId,
        action: ConfirmAction,
    ) -> EngineResult<ResultRecord> {
        match action {
            ConfirmAction::Confirm => self.apply_confirm(session_id, result_id).await,
            ConfirmAction::Regenerate => self.apply_regenerate(session_id, result_id).await,
            ConfirmAction::Modify => Err(EngineError::Validation(
                "MODIFY requires modifications; call modify_result instead".into(),
            )),
        }
    }

    async fn apply_confirm(&self, session_id: SessionId, result_id: ResultId) -> EngineResult<ResultRecord> {
        let results = self.store.list_results(session_id).await?;
        let mut target = results
            .into_iter()
            .find(|r| r.id == result_id)
            .ok_or_else(|| EngineError::NotFound(format!("result {result_id} not found")))?;
        target.status = ResultStatus::Confirmed;
        self.store.update_result(session_id, target.clone()).await?;
        Ok(target)
    }

    /// `MODIFY`: a direct-edit payload becomes a new result version
    /// immediately; a new-prompts payload reuses the Executor pipeline by
    /// re-enqueuing them as an ordinary batch (spec §4.9).
    pub async fn modify_result(
        &self,
        session_id: SessionId,
        result_id: ResultId,
        payload: ModifyPayload,
    ) -> EngineResult<ModifyOutcome> {
        self.store.require_session(session_id).await?;
        let existing = self.store.list_results(session_id).await?;
        if !existing.iter().any(|r| r.id == result_id) {
            return Err(EngineError::NotFound(format!("result {result_id} not found")));
        }
        match payload {
            ModifyPayload::DirectEdit(content) => {
                let prompt_count = self.store.list_prompts(session_id).await?.len();
                let record = crate::assembler::assemble_from_content(session_id, &existing, content, prompt_count);
                let record = self.store.add_result(session_id, record).await?;
                Ok(ModifyOutcome::NewResult(record))
            }
            ModifyPayload::NewPrompts(inputs) => {
                let result = self.submit_prompts(session_id, inputs).await?;
                Ok(ModifyOutcome::Enqueued(result))
            }
        }
    }

    async fn apply_regenerate(&self, session_id: SessionId, _result_id: ResultId) -> EngineResult<ResultRecord> {
        let mut prompts = self.store.list_prompts(session_id).await?;
        for prompt in prompts.iter_mut() {
            prompt.status = PromptStatus::Pending;
            prompt.result = None;
            prompt.error = None;
            prompt.completed_at = None;
            self.store.update_prompt(prompt.clone()).await?;
        }
        self.scheduler.schedule_batch(session_id, &prompts).await?;
        self.store.update_status(session_id, SessionStatus::Processing).await?;

        // No result exists yet for the regenerated run; callers poll
        // `result(session_id, None)` once processing completes.
        self.result(session_id, None)
            .await
            .map_err(|_| EngineError::Processing("regeneration enqueued; no result yet".into()))
    }
}

#[derive(Debug, Clone)]
pub enum ModifyOutcome {
    NewResult(ResultRecord),
    Enqueued(SubmitPromptsResult),
}

/// Estimates a session's overall token footprint from its files alone,
/// ahead of any prompt submission (used by `upload`'s `tokenEstimate`).
pub fn estimate_session_tokens(files: &[File]) -> u32 {
    files.iter().map(|f| estimate_tokens(&f.plain_text)).sum()
}
