use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use docwiz_core::engine::FileUpload;
use docwiz_core::prompt::{PromptInput, TargetType};
use docwiz_core::session::SessionStatus;
use docwiz_core::{durable::DurableStore, Engine, EngineConfig};
use docwiz_llm::{ChatProvider, Gateway, ModelRecord, ModelRegistry};
use docwiz_provider_gemini::Gemini;
use docwiz_provider_ollama::Ollama;
use docwiz_provider_openai::OpenAI;

mod cli_args;
mod tracing;

use cli_args::{CliArgs, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing::setup_logging();
    let args = CliArgs::parse();

    let engine = build_engine(&args).await?;
    engine.start().await?;

    match args.command {
        Commands::Run {
            files,
            prompts,
            poll_interval_ms,
            timeout_ms,
        } => run(&engine, files, prompts, poll_interval_ms, timeout_ms).await?,
    }

    engine.shutdown().await;
    Ok(())
}

fn build_provider(args: &CliArgs) -> Result<Arc<dyn ChatProvider>> {
    let provider: Arc<dyn ChatProvider> = match args.provider.as_str() {
        "openai" => {
            let api_key = args
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .ok_or_else(|| anyhow!("no API key supplied; pass --api-key or set OPENAI_API_KEY"))?;
            let mut provider = OpenAI::new(api_key, args.model.clone());
            if let Some(base_url) = &args.base_url {
                provider = provider.with_base_url(
                    url::Url::parse(base_url)
                        .with_context(|| format!("invalid --base-url {base_url}"))?,
                );
            }
            Arc::new(provider)
        }
        "gemini" => {
            let api_key = args
                .api_key
                .clone()
                .or_else(|| std::env::var("GEMINI_API_KEY").ok())
                .ok_or_else(|| anyhow!("no API key supplied; pass --api-key or set GEMINI_API_KEY"))?;
            let mut provider = Gemini::new(api_key, args.model.clone());
            if let Some(base_url) = &args.base_url {
                provider = provider.with_base_url(
                    url::Url::parse(base_url)
                        .with_context(|| format!("invalid --base-url {base_url}"))?,
                );
            }
            Arc::new(provider)
        }
        "ollama_local" => Arc::new(Ollama::local(args.model.clone())),
        "ollama_remote" => {
            let base_url = args
                .base_url
                .as_ref()
                .ok_or_else(|| anyhow!("--base-url is required for ollama_remote"))?;
            let base_url =
                url::Url::parse(base_url).with_context(|| format!("invalid --base-url {base_url}"))?;
            Arc::new(Ollama::remote(base_url, args.model.clone()))
        }
        other => {
            return Err(anyhow!(
                "unknown --provider '{other}'; expected openai, gemini, ollama_local, or ollama_remote"
            ))
        }
    };
    Ok(provider)
}

async fn build_engine(args: &CliArgs) -> Result<Arc<Engine>> {
    let provider = build_provider(args)?;
    let provider_name = provider.provider_name().to_string();

    let registry = Arc::new(ModelRegistry::new());
    let mut model = ModelRecord::new(provider_name.clone(), args.model.clone());
    model.context_window = Some(128_000);
    registry.replace_provider_models(&provider_name, vec![model]);

    let mut gateway = Gateway::new(registry).with_preference(vec![provider_name.clone()]);
    gateway.register_provider(provider_name, provider);

    let durable = DurableStore::in_memory().await?;
    Ok(Engine::new(durable, Arc::new(gateway), EngineConfig::default()))
}

async fn run(
    engine: &Arc<Engine>,
    file_paths: Vec<String>,
    prompt_texts: Vec<String>,
    poll_interval_ms: u64,
    timeout_ms: u64,
) -> Result<()> {
    let mut uploads = Vec::with_capacity(file_paths.len());
    for path in &file_paths {
        let text = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        uploads.push(FileUpload {
            original_name: path.clone(),
            mime_type: "text/plain".into(),
            plain_text: text,
            sections: Vec::new(),
            tables: Vec::new(),
        });
    }

    let upload = engine.upload(None, uploads, None).await?;
    println!(
        "session {} created, {} file(s), ~{} tokens",
        upload.session_id,
        upload.files.len(),
        upload.token_estimate
    );

    let inputs: Vec<PromptInput> = prompt_texts
        .into_iter()
        .map(|content| PromptInput {
            content,
            priority: 0,
            target_type: TargetType::Global,
            target_file_id: None,
            target_lines: None,
            target_section: None,
        })
        .collect();
    let submitted = engine.submit_prompts(upload.session_id, inputs).await?;
    println!("submitted {} prompt(s)", submitted.prompts.len());

    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let status = engine.status(upload.session_id).await?;
        println!(
            "status={:?} progress={}% completed={}/{} clarifications={}",
            status.status,
            status.progress,
            status.prompts.completed,
            status.prompts.total,
            status.clarification_count
        );

        match status.status {
            SessionStatus::Completed => break,
            SessionStatus::Failed => {
                return Err(anyhow!("session {} failed", upload.session_id));
            }
            _ => {}
        }

        if status.has_clarifications {
            let clarifications = engine.clarifications(upload.session_id).await?;
            for c in clarifications {
                println!("clarification requested: {}", c.question);
            }
        }

        if Instant::now() >= deadline {
            return Err(anyhow!("timed out waiting for session {}", upload.session_id));
        }
        tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
    }

    let result = engine.result(upload.session_id, None).await?;
    println!("\n--- result v{} ---\n{}", result.version, result.content);
    Ok(())
}
