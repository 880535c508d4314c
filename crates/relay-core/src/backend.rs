use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::BackendError;
use crate::mode::CompletionMode;

/// Resilience state a backend reports for health checks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    /// Circuit breaker state, when the backend has one.
    pub circuit: Option<&'static str>,
    pub retries: u64,
}

/// A text-completion service the engine can call.
///
/// Implementations return the raw completion text; normalizing it is the
/// caller's business. `timeout` bounds the whole call.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    fn status(&self) -> BackendStatus {
        BackendStatus::default()
    }

    async fn complete(
        &self,
        mode: CompletionMode,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, BackendError>;
}
