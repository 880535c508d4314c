use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Longest query/answer excerpt written into a single log line.
pub const MAX_LOGGED_CHARS: usize = 280;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "relay_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout instead of the human-readable format.
    pub json: bool,
    /// Directory for the daily-rolling log file. `None` disables file output.
    pub log_dir: Option<PathBuf>,
    /// File name prefix inside `log_dir`.
    pub log_file_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            log_dir: Some(PathBuf::from("./log")),
            log_file_name: "relay.log".into(),
        }
    }
}

/// Keeps the non-blocking file writer alive; flushes pending lines on drop.
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Build the filter directive string from config.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(config)))
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let stdout_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter(&config))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter(&config))
            .boxed()
    };

    let (file_layer, file_guard, log_file) = match &config.log_dir {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, &config.log_file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(env_filter(&config));
                (Some(layer), Some(guard), Some(dir.join(&config.log_file_name)))
            }
            Err(e) => {
                eprintln!("relay-telemetry: failed to create log dir {}: {e}", dir.display());
                (None, None, None)
            }
        },
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();

    if let Some(path) = &log_file {
        tracing::info!(path = %path.display(), "writing logs to file");
    }

    TelemetryGuard {
        _file_guard: file_guard,
    }
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
/// Returns the excerpt and whether anything was dropped.
pub fn truncate_for_log(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

/// `truncate_for_log` with the default limit, rendered with an ellipsis.
pub fn log_excerpt(text: &str) -> String {
    match truncate_for_log(text, MAX_LOGGED_CHARS) {
        (excerpt, true) => format!("{excerpt}..."),
        (excerpt, false) => excerpt.to_string(),
    }
}
