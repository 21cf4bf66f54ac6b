use clap::{Parser, Subcommand};

/// Command line arguments for the document wizard demo CLI.
#[derive(Parser, Debug)]
#[clap(name = "docwiz", about = "Demo driver for the document processing wizard engine")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    /// LLM provider to register: "openai", "gemini", "ollama_local", or
    /// "ollama_remote".
    #[arg(long, default_value = "openai")]
    pub provider: String,

    /// Model name to select from the registry.
    #[arg(long, default_value = "gpt-4o-mini")]
    pub model: String,

    /// API key for the provider. Falls back to OPENAI_API_KEY/GEMINI_API_KEY
    /// depending on --provider. Unused for ollama_local/ollama_remote.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Base URL override. For "openai" and "gemini", overrides their default
    /// hosted endpoint. For "ollama_remote", required: the daemon's address.
    #[arg(long)]
    pub base_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload one or more files and submit prompts against them, then poll
    /// until the session produces a result.
    Run {
        /// Paths to plain-text files to upload.
        #[arg(long = "file", required = true)]
        files: Vec<String>,

        /// One instruction prompt. Can be repeated; each becomes its own
        /// GLOBAL prompt at priority 0, submission order determining tie-break.
        #[arg(long = "prompt", required = true)]
        prompts: Vec<String>,

        /// Poll interval in milliseconds while waiting for completion.
        #[arg(long, default_value_t = 500)]
        poll_interval_ms: u64,

        /// Give up waiting after this many milliseconds.
        #[arg(long, default_value_t = 60_000)]
        timeout_ms: u64,
    },
}
