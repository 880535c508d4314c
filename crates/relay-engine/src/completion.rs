//! Completion engine: races a slow backend against the caller's timeout.
//!
//! The backend call runs in its own task under a long ceiling. The caller
//! stops waiting when its own timeout fires and gets a "still working" reply,
//! but the backend task keeps going. If nobody received the answer by the
//! time it arrives, it goes into the [`CompletionCache`] so the next request
//! with the same text is answered immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{info, warn};

use relay_core::backend::{BackendStatus, CompletionBackend};
use relay_core::errors::BackendError;
use relay_core::mode::CompletionMode;
use relay_telemetry::log_excerpt;

use crate::cache::CompletionCache;
use crate::stats::EngineStats;

pub const DEFAULT_BACKEND_CEILING: Duration = Duration::from_secs(100);
pub const DEFAULT_STILL_WORKING_MESSAGE: &str =
    "Still thinking about that one. Ask me the same question again in a little while and I'll have the answer.";
/// `{error}` is replaced with the backend error.
pub const DEFAULT_FAILURE_TEMPLATE: &str = "Something went wrong ({error}), please try again.";
/// Full-width question mark the completion model tends to echo in front of answers.
pub const DEFAULT_ARTIFACT_PREFIX: &str = "？";

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Hard limit for one backend call, independent of any caller timeout.
    pub backend_ceiling: Duration,
    pub still_working_message: String,
    pub failure_template: String,
    pub artifact_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_ceiling: DEFAULT_BACKEND_CEILING,
            still_working_message: DEFAULT_STILL_WORKING_MESSAGE.into(),
            failure_template: DEFAULT_FAILURE_TEMPLATE.into(),
            artifact_prefix: DEFAULT_ARTIFACT_PREFIX.into(),
        }
    }
}

/// One unit of work for the engine.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub query: String,
    pub mode: CompletionMode,
    /// How long the caller is willing to wait.
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn new(query: impl Into<String>, mode: CompletionMode, timeout: Duration) -> Self {
        Self {
            query: query.into(),
            mode,
            timeout,
        }
    }
}

/// What the engine hands back. Every variant carries user-facing text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Fresh backend answer, normalized.
    Answer(String),
    /// Served from the cache without calling the backend.
    Cached(String),
    /// Caller timeout elapsed first; the backend call continues.
    StillWorking(String),
    /// Backend failed; text is the rendered failure message.
    Failed(String),
}

impl Completion {
    pub fn text(&self) -> &str {
        match self {
            Self::Answer(t) | Self::Cached(t) | Self::StillWorking(t) | Self::Failed(t) => t,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Answer(t) | Self::Cached(t) | Self::StillWorking(t) | Self::Failed(t) => t,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Answer(_) => "answer",
            Self::Cached(_) => "cached",
            Self::StillWorking(_) => "still_working",
            Self::Failed(_) => "failed",
        }
    }
}

/// Strip the echoed artifact token and surrounding whitespace.
pub fn normalize_answer(raw: &str, artifact_prefix: &str) -> String {
    let text = raw.trim_start();
    let text = if artifact_prefix.is_empty() {
        text
    } else {
        text.strip_prefix(artifact_prefix).unwrap_or(text)
    };
    text.trim().to_string()
}

fn render_failure(template: &str, error: &BackendError) -> String {
    template.replace("{error}", &error.to_string())
}

struct EngineInner {
    backend: Arc<dyn CompletionBackend>,
    cache: CompletionCache,
    stats: EngineStats,
    config: EngineConfig,
}

/// Cheap to clone; clones share the backend, cache and counters.
#[derive(Clone)]
pub struct CompletionEngine {
    inner: Arc<EngineInner>,
}

impl CompletionEngine {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                backend,
                cache: CompletionCache::new(),
                stats: EngineStats::default(),
                config,
            }),
        }
    }

    pub fn cache(&self) -> &CompletionCache {
        &self.inner.cache
    }

    pub fn stats(&self) -> &EngineStats {
        &self.inner.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    pub fn model(&self) -> &str {
        self.inner.backend.model()
    }

    pub fn backend_status(&self) -> BackendStatus {
        self.inner.backend.status()
    }

    /// Answer `request`, waiting at most `request.timeout`. Never fails.
    pub async fn complete(&self, request: CompletionRequest) -> Completion {
        if let Some(answer) = self.inner.cache.get(&request.query) {
            self.inner.stats.record_cache_hit();
            info!(
                query = %log_excerpt(&request.query),
                "answered from cache"
            );
            return Completion::Cached(answer);
        }

        let started = Instant::now();
        let timeout = request.timeout;
        let query_excerpt = log_excerpt(&request.query);

        let (tx, mut rx) = oneshot::channel();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let completion = inner.call_backend(&request).await;
            // The caller stopped listening before the answer existed.
            if let Err(completion) = tx.send(completion) {
                inner.remember_late(&request, completion, started);
            }
        });

        let completion = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(_)) => {
                self.inner.stats.record_failure();
                warn!(query = %query_excerpt, "backend task ended without a result");
                Completion::Failed(render_failure(
                    &self.inner.config.failure_template,
                    &BackendError::InvalidResponse("completion task aborted".into()),
                ))
            }
            Err(_) => {
                // An answer that lands on the deadline still counts. After
                // `close` the backend task either already sent or will cache.
                tokio::task::yield_now().await;
                rx.close();
                match rx.try_recv() {
                    Ok(completion) => completion,
                    Err(_) => {
                        self.inner.stats.record_still_working();
                        Completion::StillWorking(self.inner.config.still_working_message.clone())
                    }
                }
            }
        };

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            kind = completion.kind(),
            query = %query_excerpt,
            answer = %log_excerpt(completion.text()),
            "completion returned"
        );

        completion
    }
}

impl EngineInner {
    /// Runs detached from the caller, bounded only by the ceiling.
    async fn call_backend(&self, request: &CompletionRequest) -> Completion {
        let ceiling = self.config.backend_ceiling;
        self.stats.record_backend_call();

        let result = match tokio::time::timeout(
            ceiling,
            self.backend.complete(request.mode, &request.query, ceiling),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(ceiling)),
        };

        let completion = match result {
            Ok(raw) => Completion::Answer(normalize_answer(&raw, &self.config.artifact_prefix)),
            Err(e) => {
                self.stats.record_failure();
                warn!(
                    error = %e,
                    kind = e.error_kind(),
                    backend = self.backend.name(),
                    mode = %request.mode,
                    "backend call failed"
                );
                Completion::Failed(render_failure(&self.config.failure_template, &e))
            }
        };

        completion
    }

    /// Keep an answer nobody received so the next identical query gets it.
    fn remember_late(&self, request: &CompletionRequest, completion: Completion, started: Instant) {
        info!(
            elapsed_secs = started.elapsed().as_secs(),
            query = %log_excerpt(&request.query),
            answer = %log_excerpt(completion.text()),
            "late completion cached"
        );
        self.cache.insert(request.query.clone(), completion.into_text());
        self.stats.record_cache_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_llm::mock::{MockBackend, MockResponse};

    fn engine_with(backend: Arc<MockBackend>) -> CompletionEngine {
        CompletionEngine::new(backend, EngineConfig::default())
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn normalize_strips_artifact_and_whitespace() {
        assert_eq!(normalize_answer("？\n\n亚洲。", "？"), "亚洲。");
        assert_eq!(normalize_answer("\n\n？ Asia ", "？"), "Asia");
        assert_eq!(normalize_answer("  plain  ", "？"), "plain");
        assert_eq!(normalize_answer("？keep", ""), "？keep");
    }

    #[test]
    fn failure_template_renders_error() {
        let text = render_failure(
            DEFAULT_FAILURE_TEMPLATE,
            &BackendError::NetworkError("connection reset".into()),
        );
        assert_eq!(
            text,
            "Something went wrong (network error: connection reset), please try again."
        );
    }

    #[test]
    fn completion_accessors() {
        let c = Completion::StillWorking("wait".into());
        assert_eq!(c.text(), "wait");
        assert_eq!(c.kind(), "still_working");
        assert_eq!(c.into_text(), "wait");
    }

    #[tokio::test(start_paused = true)]
    async fn fast_path_returns_answer_and_skips_cache() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::delayed(
            secs(1),
            MockResponse::text("？\n\nX is an answer"),
        )]));
        let engine = engine_with(Arc::clone(&backend));

        let completion = engine
            .complete(CompletionRequest::new("X", CompletionMode::Fast, secs(30)))
            .await;

        assert_eq!(completion, Completion::Answer("X is an answer".into()));
        assert!(engine.cache().is_empty());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_shorter_than_backend_yields_still_working() {
        let backend = Arc::new(MockBackend::always(MockResponse::delayed(
            secs(3),
            MockResponse::text("late"),
        )));
        let engine = engine_with(Arc::clone(&backend));

        let short = engine
            .complete(CompletionRequest::new("q1", CompletionMode::Fast, secs(2)))
            .await;
        assert_eq!(
            short,
            Completion::StillWorking(DEFAULT_STILL_WORKING_MESSAGE.into())
        );

        let long = engine
            .complete(CompletionRequest::new("q2", CompletionMode::Fast, secs(4)))
            .await;
        assert_eq!(long, Completion::Answer("late".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn answer_ready_at_deadline_is_delivered() {
        let backend = Arc::new(MockBackend::always(MockResponse::delayed(
            secs(3),
            MockResponse::text("on time"),
        )));
        let engine = engine_with(Arc::clone(&backend));

        let completion = engine
            .complete(CompletionRequest::new("q", CompletionMode::Fast, secs(3)))
            .await;
        assert_eq!(completion, Completion::Answer("on time".into()));

        tokio::time::sleep(secs(1)).await;
        assert!(engine.cache().is_empty());
        assert_eq!(engine.stats().snapshot().still_working, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn undelivered_answer_is_always_cached() {
        let backend = Arc::new(MockBackend::always(MockResponse::delayed(
            Duration::from_millis(3001),
            MockResponse::text("just late"),
        )));
        let engine = engine_with(Arc::clone(&backend));

        let completion = engine
            .complete(CompletionRequest::new("q", CompletionMode::Fast, secs(3)))
            .await;
        assert!(matches!(completion, Completion::StillWorking(_)));

        tokio::time::sleep(secs(1)).await;
        assert_eq!(engine.cache().get("q").as_deref(), Some("just late"));

        let retry = engine
            .complete(CompletionRequest::new("q", CompletionMode::Fast, secs(3)))
            .await;
        assert_eq!(retry, Completion::Cached("just late".into()));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_keeps_running_and_is_cached() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::delayed(
            secs(20),
            MockResponse::text("the real answer"),
        )]));
        let engine = engine_with(Arc::clone(&backend));

        let first = engine
            .complete(CompletionRequest::new("hello", CompletionMode::Fast, secs(5)))
            .await;
        assert!(matches!(first, Completion::StillWorking(_)));
        assert!(!engine.cache().contains("hello"));

        tokio::time::sleep(secs(16)).await;
        assert_eq!(engine.cache().get("hello").as_deref(), Some("the real answer"));

        let second = engine
            .complete(CompletionRequest::new("hello", CompletionMode::Fast, secs(5)))
            .await;
        assert_eq!(second, Completion::Cached("the real answer".into()));
        assert_eq!(backend.call_count(), 1);

        let stats = engine.stats().snapshot();
        assert_eq!(stats.backend_calls, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_writes, 1);
        assert_eq!(stats.still_working, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_is_keyed_by_text_only() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::text("unused")]));
        let engine = engine_with(Arc::clone(&backend));
        engine.cache().insert("shared question", "shared answer");

        let fast = engine
            .complete(CompletionRequest::new("shared question", CompletionMode::Fast, secs(5)))
            .await;
        let thorough = engine
            .complete(CompletionRequest::new(
                "shared question",
                CompletionMode::Thorough,
                secs(5),
            ))
            .await;

        assert_eq!(fast, Completion::Cached("shared answer".into()));
        assert_eq!(thorough, Completion::Cached("shared answer".into()));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_error_becomes_text() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::Error(
            BackendError::AuthenticationFailed("bad key".into()),
        )]));
        let engine = engine_with(Arc::clone(&backend));

        let completion = engine
            .complete(CompletionRequest::new("q", CompletionMode::Fast, secs(5)))
            .await;

        assert_eq!(
            completion,
            Completion::Failed(
                "Something went wrong (authentication failed: bad key), please try again.".into()
            )
        );
        assert!(engine.cache().is_empty());
        assert_eq!(engine.stats().snapshot().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_failure_is_cached_after_slow_path() {
        let backend = Arc::new(MockBackend::new(vec![MockResponse::delayed(
            secs(500),
            MockResponse::text("never"),
        )]));
        let config = EngineConfig {
            backend_ceiling: secs(100),
            ..Default::default()
        };
        let engine = CompletionEngine::new(backend, config);

        let completion = engine
            .complete(CompletionRequest::new("q", CompletionMode::Thorough, secs(5)))
            .await;
        assert!(matches!(completion, Completion::StillWorking(_)));

        tokio::time::sleep(secs(100)).await;
        let cached = engine.cache().get("q").unwrap();
        assert!(cached.contains("timeout after 100s"), "got {cached}");
    }

    #[tokio::test(start_paused = true)]
    async fn mode_is_forwarded_to_backend() {
        let backend = Arc::new(MockBackend::always(MockResponse::text("ok")));
        let engine = engine_with(Arc::clone(&backend));

        engine
            .complete(CompletionRequest::new("a", CompletionMode::Thorough, secs(5)))
            .await;
        engine
            .complete(CompletionRequest::new("b", CompletionMode::Fast, secs(5)))
            .await;

        assert_eq!(
            backend.calls(),
            vec![
                (CompletionMode::Thorough, "a".to_string()),
                (CompletionMode::Fast, "b".to_string())
            ]
        );
    }

    #[test]
    fn config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.backend_ceiling, secs(100));
        assert_eq!(config.artifact_prefix, "？");
        assert!(config.failure_template.contains("{error}"));
    }
}
