use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;
use tracing::Level;

use relay_core::mode::KeywordModeSelector;
use relay_core::security::ApiKey;
use relay_engine::completion::{CompletionEngine, EngineConfig};
use relay_engine::session::{SessionConfig, SessionCoordinator};
use relay_llm::openai::{OpenAiBackend, OpenAiConfig, DEFAULT_API_URL, DEFAULT_MODEL};
use relay_llm::reliable::ReliableBackend;
use relay_telemetry::TelemetryConfig;

/// Answers WeChat official-account messages with text completions.
// No `Debug`: the API key is held in plain text until it is wrapped.
#[derive(Parser)]
#[command(name = "relay", version)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "RELAY_PORT", default_value_t = 9091)]
    port: u16,

    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Token configured in the official-account console.
    #[arg(long, env = "RELAY_WX_TOKEN", hide_env_values = true)]
    wx_token: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, env = "RELAY_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, env = "RELAY_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Directory for the rolling log file.
    #[arg(long, env = "RELAY_LOG_DIR", default_value = "./log")]
    log_dir: PathBuf,

    /// Log to stdout only.
    #[arg(long, env = "RELAY_NO_LOG_FILE")]
    no_log_file: bool,

    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// JSON log lines on stdout.
    #[arg(long, env = "RELAY_LOG_JSON")]
    log_json: bool,

    /// How long one delivery attempt waits before answering empty.
    #[arg(long, env = "RELAY_ATTEMPT_DEADLINE_SECS", default_value_t = 5)]
    attempt_deadline_secs: u64,

    /// How long a session worker waits for the engine.
    #[arg(long, env = "RELAY_WORKER_TIMEOUT_SECS", default_value_t = 14)]
    worker_timeout_secs: u64,

    /// How long a resolved session keeps serving retries.
    #[arg(long, env = "RELAY_GRACE_SECS", default_value_t = 5)]
    grace_secs: u64,

    /// Hard limit on a single backend call.
    #[arg(long, env = "RELAY_BACKEND_CEILING_SECS", default_value_t = 100)]
    backend_ceiling_secs: u64,

    /// Timeout of the `/test` endpoint.
    #[arg(long, env = "RELAY_ADHOC_TIMEOUT_SECS", default_value_t = 30)]
    adhoc_timeout_secs: u64,

    /// Messages containing any of these get the thorough profile.
    #[arg(
        long = "thorough-keyword",
        env = "RELAY_THOROUGH_KEYWORDS",
        value_delimiter = ',',
        default_value = "代码"
    )]
    thorough_keywords: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _telemetry = relay_telemetry::init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: cli.log_json,
        log_dir: (!cli.no_log_file).then(|| cli.log_dir.clone()),
        ..Default::default()
    });

    tracing::info!(model = %cli.model, api_url = %cli.api_url, "starting relay");

    let openai = OpenAiBackend::new(
        ApiKey::new(cli.api_key),
        OpenAiConfig {
            api_url: cli.api_url,
            model: cli.model,
        },
    )
    .context("failed to build completion backend")?;
    let backend = ReliableBackend::with_defaults(openai);

    let engine = CompletionEngine::new(
        Arc::new(backend),
        EngineConfig {
            backend_ceiling: Duration::from_secs(cli.backend_ceiling_secs),
            ..Default::default()
        },
    );

    let coordinator = SessionCoordinator::new(
        engine,
        Arc::new(KeywordModeSelector::new(cli.thorough_keywords)),
        SessionConfig {
            attempt_deadline: Duration::from_secs(cli.attempt_deadline_secs),
            worker_timeout: Duration::from_secs(cli.worker_timeout_secs),
            grace_period: Duration::from_secs(cli.grace_secs),
        },
    )
    .context("invalid session timing")?;

    if cli.wx_token.is_none() {
        tracing::warn!("RELAY_WX_TOKEN not set, WeChat verification will be refused");
    }

    let config = relay_server::ServerConfig {
        host: cli.host,
        port: cli.port,
        adhoc_timeout: Duration::from_secs(cli.adhoc_timeout_secs),
        ..Default::default()
    };
    let handle = relay_server::start(config, coordinator, cli.wx_token.map(SecretString::from))
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_match_session_defaults() {
        let cli = Cli::try_parse_from(["relay", "--api-key", "sk-test"]).unwrap();
        assert_eq!(cli.port, 9091);
        assert_eq!(cli.thorough_keywords, vec!["代码".to_string()]);
        assert_eq!(cli.log_level, Level::INFO);

        let defaults = SessionConfig::default();
        assert_eq!(Duration::from_secs(cli.attempt_deadline_secs), defaults.attempt_deadline);
        assert_eq!(Duration::from_secs(cli.worker_timeout_secs), defaults.worker_timeout);
        assert_eq!(Duration::from_secs(cli.grace_secs), defaults.grace_period);
    }

    #[test]
    fn keywords_split_on_comma() {
        let cli = Cli::try_parse_from([
            "relay",
            "--api-key",
            "sk-test",
            "--thorough-keyword",
            "代码,code",
        ])
        .unwrap();
        assert_eq!(cli.thorough_keywords, vec!["代码".to_string(), "code".to_string()]);
    }
}
