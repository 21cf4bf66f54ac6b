//! Scheduler (spec §4.4): pops jobs off the Priority Queue and dispatches
//! each to the Executor under a concurrency cap, grounded on the teacher's
//! `WorkerManager` (`crates/agent/src/agent/worker_manager.rs`) — a
//! `Notify`-driven loop bounded by a semaphore rather than a fixed pool of
//! worker threads.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};

use crate::error::EngineResult;
use crate::executor::Executor;
use crate::prompt::{PromptId, PromptStatus};
use crate::queue::{Job, PriorityQueue};
use crate::session::{SessionId, SessionStatus};
use crate::store::EngineStore;

/// Dispatches queued prompt jobs to the Executor, capped at
/// `max_concurrent_processing` in-flight executions (spec §4.4/§5).
pub struct Scheduler {
    queue: Arc<PriorityQueue>,
    store: Arc<EngineStore>,
    executor: Arc<Executor>,
    semaphore: Arc<Semaphore>,
    notify: Arc<Notify>,
    shutting_down: AtomicBool,
    graceful_shutdown: Duration,
    /// Jobs currently dispatched to an executor task, guarding against a
    /// job being popped twice before its durable row is removed.
    in_flight: tokio::sync::Mutex<HashSet<(SessionId, PromptId)>>,
    /// Sessions with an executor currently running, so a second prompt for
    /// the same session is held back rather than run concurrently with it
    /// (spec §4.4/§5: one session's prompts execute one at a time).
    active_sessions: tokio::sync::Mutex<HashSet<SessionId>>,
    /// Jobs popped off the heap while their session was active, waiting to
    /// be returned to the heap once that session's executor finishes.
    deferred: tokio::sync::Mutex<HashMap<SessionId, Vec<Job>>>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<PriorityQueue>,
        store: Arc<EngineStore>,
        executor: Arc<Executor>,
        max_concurrent_processing: usize,
        graceful_shutdown_secs: u64,
    ) -> Self {
        Self {
            queue,
            store,
            executor,
            semaphore: Arc::new(Semaphore::new(max_concurrent_processing.max(1))),
            notify: Arc::new(Notify::new()),
            shutting_down: AtomicBool::new(false),
            graceful_shutdown: Duration::from_secs(graceful_shutdown_secs),
            in_flight: tokio::sync::Mutex::new(HashSet::new()),
            active_sessions: tokio::sync::Mutex::new(HashSet::new()),
            deferred: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Rebuilds the in-memory heap from whatever the durable store still
    /// has queued, for resuming after a restart (spec §4.3).
    pub async fn restore(&self) -> EngineResult<usize> {
        let jobs = self.store.load_jobs().await?;
        let count = jobs.len();
        for job in jobs {
            self.queue.enqueue(job.session_id, job.prompt_id, job.priority);
        }
        if count > 0 {
            self.notify.notify_one();
        }
        Ok(count)
    }

    /// Enqueues one prompt, assigning it the next queue sequence and
    /// persisting the job durably before waking the dispatch loop.
    pub async fn schedule(&self, session_id: SessionId, prompt_id: PromptId, priority: i32) -> EngineResult<Job> {
        let job = self.queue.enqueue(session_id, prompt_id, priority);
        self.store.persist_job(job.clone()).await?;
        self.notify.notify_one();
        Ok(job)
    }

    /// Enqueues an already-ordered batch (spec §4.2: batch validation has
    /// already happened by the time prompts reach the scheduler).
    pub async fn schedule_batch(&self, session_id: SessionId, prompts: &[crate::prompt::Prompt]) -> EngineResult<()> {
        for prompt in prompts {
            self.schedule(session_id, prompt.id, prompt.priority).await?;
        }
        Ok(())
    }

    /// Removes every queued job for a session (lazy cancellation, spec
    /// §4.4: triggered when a session transitions to EXPIRED or FAILED).
    pub async fn cancel_session(&self, session_id: SessionId) -> EngineResult<usize> {
        let removed = self.queue.remove_session(session_id);
        Ok(removed)
    }

    /// Runs the dispatch loop until `shutdown` is called. Intended to be
    /// spawned as its own task: `tokio::spawn(scheduler.clone().run())`.
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            let Some(job) = self.queue.pop() else {
                // Nothing queued right now; wait for a `schedule` wakeup or
                // poll periodically in case a restart-recovered job raced us.
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                }
                continue;
            };

            // Lazy cancellation (spec §4.4): a session that expired or
            // failed since this job was enqueued is inspected and dropped
            // here rather than at enqueue time.
            match self.store.get_session(job.session_id).await {
                Ok(Some(session))
                    if matches!(
                        session.status,
                        crate::session::SessionStatus::Expired | crate::session::SessionStatus::Failed
                    ) =>
                {
                    if let Err(e) = self.store.remove_job(job.session_id, job.prompt_id).await {
                        warn!(session_id = %job.session_id, error = %e, "failed to drop cancelled job");
                    }
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(session_id = %job.session_id, error = %e, "failed to look up session for lazy cancellation check");
                }
            }

            // Idempotency guard (spec §4.4 step 1 / §8 testable property 9):
            // a prompt already PROCESSING or COMPLETED was already handled
            // by some earlier dispatch (e.g. a duplicate durable job
            // surviving a restart); drop it instead of re-running it.
            let prompt = match self.store.get_prompt(job.session_id, job.prompt_id).await {
                Ok(prompt) => prompt,
                Err(e) => {
                    warn!(session_id = %job.session_id, prompt_id = %job.prompt_id, error = %e, "failed to load prompt for dispatch, dropping job");
                    if let Err(e) = self.store.remove_job(job.session_id, job.prompt_id).await {
                        warn!(session_id = %job.session_id, prompt_id = %job.prompt_id, error = %e, "failed to drop unloadable job");
                    }
                    continue;
                }
            };
            if matches!(prompt.status, PromptStatus::Processing | PromptStatus::Completed) {
                if let Err(e) = self.store.remove_job(job.session_id, job.prompt_id).await {
                    warn!(session_id = %job.session_id, prompt_id = %job.prompt_id, error = %e, "failed to drop duplicate job for already-processed prompt");
                }
                continue;
            }

            {
                let mut active = self.active_sessions.lock().await;
                if !active.insert(job.session_id) {
                    // Another prompt for this session is already running;
                    // hold this one back until that executor finishes.
                    self.deferred
                        .lock()
                        .await
                        .entry(job.session_id)
                        .or_default()
                        .push(job);
                    continue;
                }
            }

            {
                let mut inflight = self.in_flight.lock().await;
                if !inflight.insert((job.session_id, job.prompt_id)) {
                    // Already dispatched (can happen right after a restart
                    // races a fresh `schedule` call); drop the duplicate.
                    self.active_sessions.lock().await.remove(&job.session_id);
                    continue;
                }
            }

            // Mark its prompt PROCESSING and update its session to
            // PROCESSING before dispatch (spec §4.4 step 1).
            let mut prompt = prompt;
            prompt.status = PromptStatus::Processing;
            if let Err(e) = self.store.update_prompt(prompt).await {
                warn!(session_id = %job.session_id, prompt_id = %job.prompt_id, error = %e, "failed to mark prompt PROCESSING before dispatch");
            }
            if let Err(e) = self
                .store
                .update_status(job.session_id, SessionStatus::Processing)
                .await
            {
                warn!(session_id = %job.session_id, error = %e, "failed to mark session PROCESSING before dispatch");
            }

            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let executor = self.executor.clone();
            let store = self.store.clone();
            let scheduler = self.clone();
            let Job {
                session_id,
                prompt_id,
                ..
            } = job;

            tokio::spawn(async move {
                let _permit = permit;
                info!(%session_id, %prompt_id, "dispatching prompt job");
                if let Err(e) = executor.run(session_id, prompt_id).await {
                    error!(%session_id, %prompt_id, error = %e, "prompt execution failed");
                }
                if let Err(e) = store.remove_job(session_id, prompt_id).await {
                    warn!(%session_id, %prompt_id, error = %e, "failed to remove completed job from durable queue");
                }
                scheduler.in_flight.lock().await.remove(&(session_id, prompt_id));
                scheduler.active_sessions.lock().await.remove(&session_id);

                let requeued = scheduler.deferred.lock().await.remove(&session_id);
                if let Some(jobs) = requeued {
                    for job in jobs {
                        scheduler.queue.push_back(job);
                    }
                    scheduler.notify.notify_one();
                }
            });
        }
    }

    /// Signals the dispatch loop to stop popping new jobs and waits up to
    /// `graceful_shutdown_secs` for in-flight executors to drain (spec §9
    /// "graceful shutdown": in-flight work finishes, nothing new starts).
    pub async fn shutdown(&self, total_permits: usize) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();

        let deadline = tokio::time::Instant::now() + self.graceful_shutdown;
        loop {
            if self.semaphore.available_permits() >= total_permits {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("graceful shutdown window elapsed with executors still in flight");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::durable::DurableStore;
    use crate::events::EventBus;
    use docwiz_llm::{Gateway, ModelRegistry};

    async fn scheduler() -> Arc<Scheduler> {
        let store = Arc::new(EngineStore::new(DurableStore::in_memory().await.unwrap(), 86_400));
        let gateway = Arc::new(Gateway::new(Arc::new(ModelRegistry::new())));
        let config = EngineConfig::default();
        let events = Arc::new(EventBus::new());
        let executor = Arc::new(Executor::new(store.clone(), gateway, config.clone(), events));
        Arc::new(Scheduler::new(
            Arc::new(PriorityQueue::new()),
            store,
            executor,
            config.max_concurrent_processing,
            1,
        ))
    }

    #[tokio::test]
    async fn schedule_persists_job_and_makes_it_poppable() {
        let scheduler = scheduler().await;
        let session_id = uuid::Uuid::new_v4();
        let prompt_id = uuid::Uuid::new_v4();
        scheduler.schedule(session_id, prompt_id, 1).await.unwrap();
        assert_eq!(scheduler.queue_size(), 1);

        let jobs = scheduler.store.load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].prompt_id, prompt_id);
    }

    #[tokio::test]
    async fn cancel_session_drains_its_queued_jobs() {
        let scheduler = scheduler().await;
        let session_id = uuid::Uuid::new_v4();
        scheduler.schedule(session_id, uuid::Uuid::new_v4(), 1).await.unwrap();
        scheduler.schedule(session_id, uuid::Uuid::new_v4(), 2).await.unwrap();

        let removed = scheduler.cancel_session(session_id).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(scheduler.queue_size(), 0);
    }

    #[tokio::test]
    async fn second_prompt_for_an_active_session_is_deferred_not_dropped() {
        let scheduler = scheduler().await;
        let session_id = uuid::Uuid::new_v4();
        let job = scheduler.queue.enqueue(session_id, uuid::Uuid::new_v4(), 1);

        // Simulate the run loop's bookkeeping without spawning a full
        // executor: mark the session active, then pop a second job for the
        // same session and confirm it gets deferred rather than dispatched.
        scheduler.active_sessions.lock().await.insert(session_id);
        let popped = scheduler.queue.pop().unwrap();
        assert_eq!(popped.prompt_id, job.prompt_id);

        scheduler
            .deferred
            .lock()
            .await
            .entry(session_id)
            .or_default()
            .push(popped);
        assert!(scheduler.queue.pop().is_none());

        // Once the session frees up, its deferred job returns to the heap.
        scheduler.active_sessions.lock().await.remove(&session_id);
        let requeued = scheduler.deferred.lock().await.remove(&session_id).unwrap();
        for job in requeued {
            scheduler.queue.push_back(job);
        }
        assert_eq!(scheduler.queue_size(), 1);
    }

    #[tokio::test]
    async fn restore_rebuilds_heap_from_durable_jobs() {
        let scheduler = scheduler().await;
        let session_id = uuid::Uuid::new_v4();
        scheduler.store.persist_job(Job {
            session_id,
            prompt_id: uuid::Uuid::new_v4(),
            priority: 1,
            sequence: 0,
        }).await.unwrap();

        let restored = scheduler.restore().await.unwrap();
        assert_eq!(restored, 1);
        assert_eq!(scheduler.queue_size(), 1);
    }

    #[tokio::test]
    async fn run_loop_drops_jobs_for_expired_sessions_on_dequeue() {
        let scheduler = scheduler().await;
        let session = scheduler.store.create_session(None, None, 3600).await.unwrap();
        scheduler
            .store
            .update_status(session.id, crate::session::SessionStatus::Expired)
            .await
            .unwrap();
        scheduler
            .schedule(session.id, uuid::Uuid::new_v4(), 1)
            .await
            .unwrap();

        let run_handle = tokio::spawn(scheduler.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown(scheduler.semaphore.available_permits()).await;
        run_handle.abort();

        assert_eq!(scheduler.queue_size(), 0);
        assert!(scheduler.store.load_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_loop_drops_duplicate_job_for_already_completed_prompt() {
        use crate::prompt::{PromptInput, TargetType, build_batch};

        let scheduler = scheduler().await;
        let session = scheduler.store.create_session(None, None, 3600).await.unwrap();
        let prompts = build_batch(
            session.id,
            vec![PromptInput {
                content: "do it".into(),
                priority: 0,
                target_type: TargetType::Global,
                target_file_id: None,
                target_lines: None,
                target_section: None,
            }],
        )
        .unwrap();
        let prompt_id = prompts[0].id;
        scheduler.store.add_prompts(session.id, prompts.clone()).await.unwrap();

        let mut completed = prompts[0].clone();
        completed.status = PromptStatus::Completed;
        scheduler.store.update_prompt(completed).await.unwrap();

        scheduler.schedule(session.id, prompt_id, 0).await.unwrap();

        let run_handle = tokio::spawn(scheduler.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown(scheduler.semaphore.available_permits()).await;
        run_handle.abort();

        assert_eq!(scheduler.queue_size(), 0);
        assert!(scheduler.store.load_jobs().await.unwrap().is_empty());
        let reloaded = scheduler.store.get_prompt(session.id, prompt_id).await.unwrap();
        assert_eq!(reloaded.status, PromptStatus::Completed);
    }

    #[tokio::test]
    async fn dispatch_marks_prompt_and_session_processing_before_running() {
        use crate::prompt::{PromptInput, TargetType, build_batch};

        let scheduler = scheduler().await;
        let session = scheduler.store.create_session(None, None, 3600).await.unwrap();
        let prompts = build_batch(
            session.id,
            vec![PromptInput {
                content: "do it".into(),
                priority: 0,
                target_type: TargetType::Global,
                target_file_id: None,
                target_lines: None,
                target_section: None,
            }],
        )
        .unwrap();
        let prompt_id = prompts[0].id;
        scheduler.store.add_prompts(session.id, prompts.clone()).await.unwrap();

        scheduler.schedule(session.id, prompt_id, 0).await.unwrap();

        let run_handle = tokio::spawn(scheduler.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown(scheduler.semaphore.available_permits()).await;
        run_handle.abort();

        // No model is configured so the executor itself fails fast, but the
        // dispatch loop must have already flipped both statuses to
        // PROCESSING before it ever acquired a permit.
        let reloaded_session = scheduler.store.get_session(session.id).await.unwrap().unwrap();
        assert_ne!(reloaded_session.status, crate::session::SessionStatus::Active);
    }
}
