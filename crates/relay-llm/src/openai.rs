use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use relay_core::backend::CompletionBackend;
use relay_core::errors::BackendError;
use relay_core::mode::CompletionMode;
use relay_core::security::ApiKey;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/completions";
pub const DEFAULT_MODEL: &str = "text-davinci-003";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Answers are cut at the first Chinese full stop.
const STOP_SEQUENCE: &str = "。";

/// Generation knobs for one completion mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModeProfile {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl ModeProfile {
    pub fn for_mode(mode: CompletionMode) -> Self {
        match mode {
            CompletionMode::Fast => Self {
                max_tokens: 1024,
                temperature: 0.5,
            },
            CompletionMode::Thorough => Self {
                max_tokens: 4000,
                temperature: 0.95,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_url: String,
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            model: DEFAULT_MODEL.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    frequency_penalty: f64,
    presence_penalty: f64,
    stop: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

/// Legacy `/v1/completions` backend.
pub struct OpenAiBackend {
    client: Client,
    api_key: ApiKey,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    pub fn new(api_key: ApiKey, config: OpenAiConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::InvalidRequest(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    fn request_body<'a>(&'a self, mode: CompletionMode, prompt: &'a str) -> CompletionBody<'a> {
        let profile = ModeProfile::for_mode(mode);
        CompletionBody {
            model: &self.config.model,
            prompt,
            max_tokens: profile.max_tokens,
            temperature: profile.temperature,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: STOP_SEQUENCE,
        }
    }
}

fn classify_transport_error(e: reqwest::Error, timeout: Duration) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(timeout)
    } else {
        BackendError::NetworkError(e.to_string())
    }
}

/// `Retry-After` in its delta-seconds form.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Turn a response body into completion text or a typed error.
fn parse_completion(status: u16, body: &str) -> Result<String, BackendError> {
    let parsed: CompletionResponse = serde_json::from_str(body).unwrap_or_default();
    let api_message = parsed
        .error
        .as_ref()
        .map(|e| e.message.clone())
        .filter(|m| !m.is_empty());

    if !(200..300).contains(&status) {
        return Err(BackendError::from_status(
            status,
            api_message.unwrap_or_else(|| body.to_string()),
        ));
    }

    match parsed.choices.into_iter().next() {
        Some(choice) => Ok(choice.text),
        None => Err(BackendError::InvalidResponse(
            api_message.unwrap_or_else(|| "response contained no choices".into()),
        )),
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, prompt), fields(model = %self.config.model))]
    async fn complete(
        &self,
        mode: CompletionMode,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, BackendError> {
        let body = self.request_body(mode, prompt);

        let resp = self
            .client
            .post(&self.config.api_url)
            .timeout(timeout)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.0.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, timeout))?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = resp
            .text()
            .await
            .map_err(|e| classify_transport_error(e, timeout))?;

        match parse_completion(status, &text) {
            Err(BackendError::RateLimited { .. }) => Err(BackendError::RateLimited { retry_after }),
            other => other,
        }
    }
}
