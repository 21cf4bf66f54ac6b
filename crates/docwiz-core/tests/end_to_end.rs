//! End-to-end engine tests against an in-memory durable store and a mock
//! `ChatProvider`, exercising the upload → submit → dispatch → result
//! lifecycle without a real LLM endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docwiz_core::engine::FileUpload;
use docwiz_core::prompt::{PromptInput, TargetType};
use docwiz_core::result::ConfirmAction;
use docwiz_core::session::SessionStatus;
use docwiz_core::{durable::DurableStore, Engine, EngineConfig};
use docwiz_llm::{ChatMessage, ChatProvider, ChatResponse, Gateway, LLMError, ModelRecord, ModelRegistry};

struct StubProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl ChatProvider for StubProvider {
    fn provider_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> Result<ChatResponse, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse {
            content: format!("echo: {user_prompt}"),
            provider: "stub".into(),
            model: "stub-1".into(),
            usage: None,
        })
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse {
            content: messages.last().map(|m| m.content.clone()).unwrap_or_default(),
            provider: "stub".into(),
            model: "stub-1".into(),
            usage: None,
        })
    }
}

async fn test_engine() -> Arc<Engine> {
    let registry = Arc::new(ModelRegistry::new());
    let mut model = ModelRecord::new("stub", "stub-1");
    model.context_window = Some(8_000);
    registry.replace_provider_models("stub", vec![model]);

    let mut gateway = Gateway::new(registry).with_preference(vec!["stub".into()]);
    gateway.register_provider(
        "stub",
        Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
        }),
    );

    let durable = DurableStore::in_memory().await.unwrap();
    let engine = Engine::new(durable, Arc::new(gateway), EngineConfig::default());
    engine.start().await.unwrap();
    engine
}

async fn wait_for_completion(engine: &Arc<Engine>, session_id: uuid::Uuid) {
    for _ in 0..200 {
        let status = engine.status(session_id).await.unwrap();
        if status.status == SessionStatus::Completed || status.status == SessionStatus::Failed {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session {session_id} did not settle in time");
}

#[tokio::test]
async fn a_global_prompt_produces_a_confirmable_result() {
    let engine = test_engine().await;

    let upload = engine
        .upload(
            None,
            vec![FileUpload {
                original_name: "notes.txt".into(),
                mime_type: "text/plain".into(),
                plain_text: "quarterly revenue rose 12%".into(),
                sections: Vec::new(),
                tables: Vec::new(),
            }],
            None,
        )
        .await
        .unwrap();

    engine
        .submit_prompts(
            upload.session_id,
            vec![PromptInput {
                content: "summarize the document".into(),
                priority: 0,
                target_type: TargetType::Global,
                target_file_id: None,
                target_lines: None,
                target_section: None,
            }],
        )
        .await
        .unwrap();

    wait_for_completion(&engine, upload.session_id).await;

    let status = engine.status(upload.session_id).await.unwrap();
    assert_eq!(status.status, SessionStatus::Completed);
    assert_eq!(status.prompts.completed, 1);

    let result = engine.result(upload.session_id, None).await.unwrap();
    assert!(result.content.contains("echo: "));

    let confirmed = engine
        .confirm_result(upload.session_id, result.id, ConfirmAction::Confirm)
        .await
        .unwrap();
    assert_eq!(confirmed.id, result.id);

    engine.shutdown().await;
}

#[tokio::test]
async fn two_prompts_in_one_session_both_complete() {
    let engine = test_engine().await;

    let upload = engine
        .upload(
            None,
            vec![FileUpload {
                original_name: "a.txt".into(),
                mime_type: "text/plain".into(),
                plain_text: "first file content".into(),
                sections: Vec::new(),
                tables: Vec::new(),
            }],
            None,
        )
        .await
        .unwrap();

    engine
        .submit_prompts(
            upload.session_id,
            vec![
                PromptInput {
                    content: "first instruction".into(),
                    priority: 0,
                    target_type: TargetType::Global,
                    target_file_id: None,
                    target_lines: None,
                    target_section: None,
                },
                PromptInput {
                    content: "second instruction".into(),
                    priority: 1,
                    target_type: TargetType::Global,
                    target_file_id: None,
                    target_lines: None,
                    target_section: None,
                },
            ],
        )
        .await
        .unwrap();

    wait_for_completion(&engine, upload.session_id).await;

    let status = engine.status(upload.session_id).await.unwrap();
    assert_eq!(status.prompts.completed, 2);
    assert_eq!(status.prompts.failed, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn deleting_a_session_cancels_its_queued_work() {
    let engine = test_engine().await;

    let upload = engine
        .upload(None, vec![], None)
        .await
        .unwrap();

    engine.delete_session(upload.session_id).await.unwrap();

    let err = engine.status(upload.session_id).await.unwrap_err();
    assert!(matches!(err, docwiz_core::error::EngineError::NotFound(_)));

    engine.shutdown().await;
}
