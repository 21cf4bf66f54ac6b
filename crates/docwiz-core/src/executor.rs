//! Executor (spec §4.5): the per-job pipeline run by the Scheduler for one
//! dequeued prompt. A plain async function rather than an actor, grounded
//! on the teacher's linear execute-one-step shape
//! (`crates/agent/src/agent/execution/mod.rs`) generalized to this spec's
//! nine-step pipeline.

use std::sync::Arc;
use std::time::Instant;

use docwiz_llm::Gateway;

use crate::assembler::{self, CallOutput};
use crate::chunking::{ChunkingPlanner, ExecutionPlan, FileContent};
use crate::clarification;
use crate::config::EngineConfig;
use crate::context::{self, TargetedContent};
use crate::conversation::{ConversationMessage, MessageType, Role};
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEventKind, EventBus};
use crate::prompt::{Prompt, PromptStatus};
use crate::session::{SessionId, SessionStatus};
use crate::store::EngineStore;

pub struct Executor {
    store: Arc<EngineStore>,
    gateway: Arc<Gateway>,
    config: EngineConfig,
    events: Arc<EventBus>,
}

impl Executor {
    pub fn new(
        store: Arc<EngineStore>,
        gateway: Arc<Gateway>,
        config: EngineConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
            events,
        }
    }

    /// Runs the full pipeline for one prompt. On success the prompt's
    /// `result`/status are persisted and the session's completion state is
    /// re-evaluated (spec §4.5 steps 1-9). On failure the prompt is marked
    /// FAILED, the session is marked FAILED, and an `error` event fires —
    /// no retries are attempted (spec §4.5 "Failure policy").
    pub async fn run(&self, session_id: SessionId, prompt_id: uuid::Uuid) -> EngineResult<()> {
        match self.run_inner(session_id, prompt_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail_prompt_and_session(session_id, prompt_id, &e).await;
                Err(e)
            }
        }
    }

    async fn run_inner(&self, session_id: SessionId, prompt_id: uuid::Uuid) -> EngineResult<()> {
        // 1. Load the prompt and its owning session's files.
        let prompt = self.store.get_prompt(session_id, prompt_id).await?;
        let files = self.store.list_files(session_id).await?;

        // 2. Collect previousResults.
        let all_prompts = self.store.list_prompts(session_id).await?;
        let previous = context::previous_results(&prompt, &all_prompts);
        let system_prompt = build_system_prompt(&previous);
        let system_tokens = crate::chunking::estimate_tokens(&system_prompt);

        // 3. Determine the active model's context window via the Gateway.
        let window = self.gateway.current_context_window();

        // 4. Ask the Chunking Planner for an execution plan.
        let planner = ChunkingPlanner::new(&self.config);
        let targeted = context::resolve_target(&prompt, &files)?;
        let plan = match targeted {
            TargetedContent::AllFiles(files) => {
                let contents: Vec<FileContent> = files
                    .iter()
                    .map(|f| FileContent {
                        file_id: f.id,
                        name: f.original_name.clone(),
                        text: f.plain_text.clone(),
                    })
                    .collect();
                planner.plan_global(&contents, system_tokens, window)
            }
            TargetedContent::Single { file, text } => {
                planner.plan_single_content(file.id, &file.original_name, &text, system_tokens, window)
            }
        };

        // 5-6. Execute the plan, accumulating chunk outputs and logging each call.
        let outputs = self
            .execute_plan(&plan, &prompt, &system_prompt, session_id)
            .await?;

        // 7. Combine chunk outputs into the prompt's final result.
        let combined: Vec<CallOutput> = outputs;
        let final_text = assembler::combine(&combined);

        let mut prompt = prompt;
        prompt.result = Some(final_text.clone());
        prompt.status = PromptStatus::Completed;
        prompt.completed_at = Some(chrono::Utc::now());
        self.store.update_prompt(prompt.clone()).await?;

        // 8. Uncertainty detection over the final text.
        self.run_clarification(session_id, &prompt, &final_text).await?;

        // 9. Re-evaluate session completion.
        self.reconcile_session_status(session_id).await?;

        Ok(())
    }

    async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        prompt: &Prompt,
        system_prompt: &str,
        session_id: SessionId,
    ) -> EngineResult<Vec<CallOutput>> {
        let mut outputs = Vec::new();
        let mut prior_parts: Vec<String> = Vec::new();

        for call in plan.calls() {
            let started = Instant::now();
            let user_prompt = build_user_prompt(prompt, call, &prior_parts);

            let response = self
                .gateway
                .complete(system_prompt, &user_prompt)
                .await
                .map_err(EngineError::from)?;

            if response.content.trim().is_empty() {
                return Err(EngineError::Processing(
                    "empty response after normalization".into(),
                ));
            }

            let tokens_used = response.usage.as_ref().map(|u| u.total_tokens());
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let seq = self.store.next_sequence(session_id).await?;
            let message = ConversationMessage::new(
                session_id,
                MessageType::General,
                Role::Assistant,
                response.content.clone(),
                Some(serde_json::json!({
                    "promptId": prompt.id,
                    "tokensUsed": tokens_used,
                    "processingTime": elapsed_ms,
                })),
                None,
                seq,
            );
            self.store.append_message(session_id, message).await?;
            self.events.publish(
                session_id,
                EngineEventKind::ModelResult {
                    prompt_id: prompt.id,
                    tokens_used,
                },
            );

            prior_parts.push(response.content.clone());
            outputs.push(CallOutput {
                call: call.clone(),
                text: response.content,
            });
        }

        Ok(outputs)
    }

    async fn run_clarification(
        &self,
        session_id: SessionId,
        prompt: &Prompt,
        final_text: &str,
    ) -> EngineResult<()> {
        if !clarification::needs_clarification(final_text) {
            return Ok(());
        }

        for question in clarification::extract_questions(final_text) {
            let seq = self.store.next_sequence(session_id).await?;
            let message = ConversationMessage::new(
                session_id,
                MessageType::Clarification,
                Role::Assistant,
                question,
                Some(serde_json::json!({
                    "promptId": prompt.id,
                    "relatedToResult": true,
                })),
                None,
                seq,
            );
            let message = self.store.append_message(session_id, message).await?;
            self.events.publish(
                session_id,
                EngineEventKind::Clarification {
                    message_id: message.id,
                },
            );
        }
        Ok(())
    }

    /// Step 9: transitions the session per spec §4.5 — FAILED if any prompt
    /// FAILED; COMPLETED if all prompts are COMPLETED and no clarification
    /// is pending; otherwise stays PROCESSING.
    pub async fn reconcile_session_status(&self, session_id: SessionId) -> EngineResult<()> {
        let prompts = self.store.list_prompts(session_id).await?;
        let messages = self.store.list_messages(session_id).await?;

        if prompts.iter().any(|p| p.status == PromptStatus::Failed) {
            self.store
                .update_status(session_id, SessionStatus::Failed)
                .await?;
            self.events
                .publish(session_id, EngineEventKind::Error { message: "a prompt failed".into() });
            return Ok(());
        }

        let all_done = prompts
            .iter()
            .all(|p| matches!(p.status, PromptStatus::Completed | PromptStatus::Skipped));
        let has_pending_clarification = messages.iter().any(|m| m.is_pending_clarification(&messages));

        if all_done && !has_pending_clarification {
            self.store
                .update_status(session_id, SessionStatus::Completed)
                .await?;
            self.finalize_result(session_id).await?;
            self.events.publish(
                session_id,
                EngineEventKind::Progress { percent: 100 },
            );
            self.events.publish(session_id, EngineEventKind::Completed);
        }

        Ok(())
    }

    /// Result Assembler (spec §4.9): persists a new versioned Result once a
    /// session completes, combining every COMPLETED prompt's own result text
    /// in `(priority, executionOrder)` order.
    async fn finalize_result(&self, session_id: SessionId) -> EngineResult<()> {
        let mut prompts: Vec<Prompt> = self
            .store
            .list_prompts(session_id)
            .await?
            .into_iter()
            .filter(|p| p.status == PromptStatus::Completed && p.result.is_some())
            .collect();
        prompts.sort_by_key(|p| (p.priority, p.execution_order));

        let content = assembler::combine_prompt_results(
            &prompts.iter().filter_map(|p| p.result.clone()).collect::<Vec<_>>(),
        );

        let existing = self.store.list_results(session_id).await?;
        let record = assembler::assemble_from_content(session_id, &existing, content, prompts.len());
        self.store.add_result(session_id, record).await?;
        Ok(())
    }

    async fn fail_prompt_and_session(&self, session_id: SessionId, prompt_id: uuid::Uuid, err: &EngineError) {
        if let Ok(mut prompt) = self.store.get_prompt(session_id, prompt_id).await {
            prompt.status = PromptStatus::Failed;
            prompt.error = Some(err.to_string());
            let _ = self.store.update_prompt(prompt).await;
        }
        let _ = self
            .store
            .update_status(session_id, SessionStatus::Failed)
            .await;
        self.events.publish(
            session_id,
            EngineEventKind::Error {
                message: err.to_string(),
            },
        );
    }
}

fn build_system_prompt(previous_results: &[String]) -> String {
    if previous_results.is_empty() {
        return "You are a document processing assistant.".to_string();
    }
    format!(
        "You are a document processing assistant. Prior instruction results in this session:\n\n{}",
        previous_results.join("\n\n---\n\n")
    )
}

fn build_user_prompt(prompt: &Prompt, call: &crate::chunking::PlannedCall, prior_parts: &[String]) -> String {
    let mut sections = Vec::new();
    if !prior_parts.is_empty() {
        sections.push(format!("Prior parts so far:\n\n{}", prior_parts.join("\n\n")));
    }
    if let Some(name) = &call.file_name {
        sections.push(format!("File: {name}"));
    }
    sections.push(format!("Content:\n\n{}", call.content));
    sections.push(format!("Instruction: {}", prompt.content));
    sections.join("\n\n")
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert<T: Send + Sync>() {}
    assert::<Executor>();
}
