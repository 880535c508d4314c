//! Session coordinator: deduplicates redelivered messages.
//!
//! The messaging platform gives up on a request after a few seconds and
//! redelivers the same message (same id) a bounded number of times. The first
//! delivery starts a worker that owns the only backend call for that id; every
//! delivery, first or retry, waits on the worker's outcome for at most its own
//! deadline. The worker publishes one result, keeps the session around for a
//! grace period so stragglers can still read it, then drops it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use relay_core::ids::MessageId;
use relay_core::mode::ModeSelector;

use crate::completion::{CompletionEngine, CompletionRequest};
use crate::error::RelayError;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Default deadline for one delivery attempt.
    pub attempt_deadline: Duration,
    /// Timeout the worker hands to the completion engine.
    pub worker_timeout: Duration,
    /// How long a resolved session stays joinable.
    pub grace_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            attempt_deadline: Duration::from_secs(5),
            worker_timeout: Duration::from_secs(14),
            grace_period: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.attempt_deadline.is_zero() {
            return Err(RelayError::ZeroDuration("attempt_deadline"));
        }
        if self.grace_period.is_zero() {
            return Err(RelayError::ZeroDuration("grace_period"));
        }
        if self.worker_timeout <= self.attempt_deadline {
            return Err(RelayError::WorkerTimeoutTooShort {
                worker: self.worker_timeout,
                deadline: self.attempt_deadline,
            });
        }
        Ok(())
    }
}

/// Result of one delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered(String),
    /// Deadline elapsed first. The transport should stay silent so the
    /// platform redelivers.
    NoAnswerYet,
}

impl AttemptOutcome {
    pub fn into_reply(self) -> Option<String> {
        match self {
            Self::Delivered(text) => Some(text),
            Self::NoAnswerYet => None,
        }
    }
}

/// One in-flight message.
#[derive(Debug)]
pub struct Session {
    id: MessageId,
    created_at: Instant,
    outcome: watch::Receiver<Option<String>>,
}

impl Session {
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.outcome.clone()
    }
}

struct CoordinatorInner {
    engine: CompletionEngine,
    sessions: DashMap<MessageId, Arc<Session>>,
    selector: Arc<dyn ModeSelector>,
    config: SessionConfig,
}

#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SessionCoordinator {
    pub fn new(
        engine: CompletionEngine,
        selector: Arc<dyn ModeSelector>,
        config: SessionConfig,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                engine,
                sessions: DashMap::new(),
                selector,
                config,
            }),
        })
    }

    pub fn engine(&self) -> &CompletionEngine {
        &self.inner.engine
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn live_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn session(&self, id: &MessageId) -> Option<Arc<Session>> {
        self.inner.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Deliver one attempt for message `id`, waiting at most `deadline`.
    pub async fn attempt(&self, id: MessageId, query: &str, deadline: Duration) -> AttemptOutcome {
        let started = Instant::now();
        let (session, fresh) = self.join_or_start(id, query);
        let mut outcome = session.subscribe();

        let waited = tokio::time::timeout(deadline, async move {
            outcome
                .wait_for(Option::is_some)
                .await
                .map(|value| (*value).clone())
        })
        .await;

        let result = match waited {
            Ok(Ok(Some(text))) => AttemptOutcome::Delivered(text),
            // Closed without a value, or deadline first.
            Ok(Ok(None)) | Ok(Err(_)) | Err(_) => AttemptOutcome::NoAnswerYet,
        };

        info!(
            message_id = %session.id(),
            fresh,
            delivered = matches!(result, AttemptOutcome::Delivered(_)),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "delivery attempt finished"
        );

        result
    }

    /// Attach to the live session for `id`, or register one and spawn its
    /// worker. Returns the session and whether this call created it.
    fn join_or_start(&self, id: MessageId, query: &str) -> (Arc<Session>, bool) {
        let (session, tx) = match self.inner.sessions.entry(id) {
            Entry::Occupied(existing) => {
                debug!(message_id = %existing.key(), "joining live session");
                return (Arc::clone(existing.get()), false);
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                let session = Arc::new(Session {
                    id: slot.key().clone(),
                    created_at: Instant::now(),
                    outcome: rx,
                });
                slot.insert(Arc::clone(&session));
                (session, tx)
            }
        };

        self.inner.engine.stats().record_worker_started();
        let inner = Arc::clone(&self.inner);
        let worker_session = Arc::clone(&session);
        let query = query.to_string();
        tokio::spawn(async move { inner.run_worker(worker_session, query, tx).await });

        (session, true)
    }
}

/// Unregisters a session when dropped, so a worker that unwinds does not
/// leave its id stuck in the registry.
struct Registration<'a> {
    sessions: &'a DashMap<MessageId, Arc<Session>>,
    session: Arc<Session>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        // A newer session may already own this id; leave it alone.
        let removed = self
            .sessions
            .remove_if(self.session.id(), |_, live| Arc::ptr_eq(live, &self.session));
        if removed.is_some() {
            debug!(
                message_id = %self.session.id(),
                age_ms = self.session.age().as_millis() as u64,
                "session closed"
            );
        }
    }
}

impl CoordinatorInner {
    async fn run_worker(
        &self,
        session: Arc<Session>,
        query: String,
        tx: watch::Sender<Option<String>>,
    ) {
        // Dropped before `tx`, so no new attempt joins a closed session.
        let _registration = Registration {
            sessions: &self.sessions,
            session: Arc::clone(&session),
        };

        let mode = self.selector.select(&query);
        debug!(message_id = %session.id(), %mode, "session worker started");

        let completion = self
            .engine
            .complete(CompletionRequest::new(query, mode, self.config.worker_timeout))
            .await;
        tx.send_replace(Some(completion.into_text()));

        tokio::time::sleep(self.config.grace_period).await;
    }
}
