/// Initializes the global tracing subscriber, reading `RUST_LOG` (default
/// `info`), matching the teacher's CLI entrypoint setup minus the
/// OpenTelemetry exporters this demo has no collector for.
pub fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}
