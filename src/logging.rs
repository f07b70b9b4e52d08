use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_DIR: &str = "logs";

/// Installs the global subscriber: JSON lines rotated daily under `logs/`,
/// plus human-readable stdout when `to_stdout` is set. The interactive menu
/// passes `false` so log lines do not interleave with prompts.
pub fn init_logging(file_name: &str, to_stdout: bool) {
    let file_appender = rolling::daily(LOG_DIR, file_name);
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = to_stdout.then(|| fmt::layer().with_writer(std::io::stdout));

    // Default to `info` if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}
