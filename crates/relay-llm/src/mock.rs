use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_core::backend::CompletionBackend;
use relay_core::errors::BackendError;
use relay_core::mode::CompletionMode;

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return this completion text.
    Text(String),
    /// Fail the call.
    Error(BackendError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock backend that returns pre-programmed responses in sequence.
///
/// Once the script is exhausted, later calls fail with `InvalidRequest`,
/// unless the backend was built with [`MockBackend::always`].
pub struct MockBackend {
    responses: Vec<MockResponse>,
    repeat_last: bool,
    call_count: AtomicUsize,
    calls: Mutex<Vec<(CompletionMode, String)>>,
}

impl MockBackend {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            repeat_last: false,
            call_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same response.
    pub fn always(response: MockResponse) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![response])
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Mode and prompt of every call so far, in arrival order.
    pub fn calls(&self) -> Vec<(CompletionMode, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        mode: CompletionMode,
        prompt: &str,
        _timeout: Duration,
    ) -> Result<String, BackendError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push((mode, prompt.to_string()));

        let response = match self.responses.get(idx) {
            Some(r) => r.clone(),
            None if self.repeat_last && !self.responses.is_empty() => {
                self.responses[self.responses.len() - 1].clone()
            }
            None => {
                return Err(BackendError::InvalidRequest(format!(
                    "MockBackend: no response configured for call {idx}"
                )))
            }
        };

        resolve_response(response).await
    }
}

/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<String, BackendError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Text(text) => return Ok(text),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockBackend::new(vec![MockResponse::text("first"), MockResponse::text("second")]);

        assert_eq!(mock.complete(CompletionMode::Fast, "a", T).await.unwrap(), "first");
        assert_eq!(
            mock.complete(CompletionMode::Thorough, "b", T).await.unwrap(),
            "second"
        );
        assert_eq!(mock.call_count(), 2);
        assert_eq!(
            mock.calls(),
            vec![
                (CompletionMode::Fast, "a".to_string()),
                (CompletionMode::Thorough, "b".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockBackend::new(vec![MockResponse::text("only one")]);
        let _ = mock.complete(CompletionMode::Fast, "q", T).await;
        let result = mock.complete(CompletionMode::Fast, "q", T).await;
        assert!(matches!(result, Err(BackendError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn always_repeats() {
        let mock = MockBackend::always(MockResponse::text("same"));
        for _ in 0..3 {
            assert_eq!(mock.complete(CompletionMode::Fast, "q", T).await.unwrap(), "same");
        }
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_response() {
        let mock = MockBackend::new(vec![MockResponse::delayed(
            Duration::from_secs(20),
            MockResponse::text("after delay"),
        )]);

        let start = tokio::time::Instant::now();
        let text = mock.complete(CompletionMode::Fast, "q", T).await.unwrap();
        assert_eq!(text, "after delay");
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn delayed_error() {
        let mock = MockBackend::new(vec![MockResponse::delayed(
            Duration::from_millis(20),
            MockResponse::Error(BackendError::RateLimited { retry_after: None }),
        )]);

        match mock.complete(CompletionMode::Fast, "q", T).await {
            Err(BackendError::RateLimited { .. }) => {}
            other => panic!("expected RateLimited, got: {other:?}"),
        }
    }

    #[test]
    fn provider_properties() {
        let mock = MockBackend::new(vec![]);
        assert_eq!(mock.name(), "mock");
        assert_eq!(mock.model(), "mock-model");
    }
}
