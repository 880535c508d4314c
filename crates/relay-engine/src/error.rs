use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("worker timeout {worker:?} must be longer than the attempt deadline {deadline:?}")]
    WorkerTimeoutTooShort { worker: Duration, deadline: Duration },

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}
