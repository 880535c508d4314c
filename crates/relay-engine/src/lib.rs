pub mod cache;
pub mod completion;
pub mod error;
pub mod session;
pub mod stats;

pub use cache::CompletionCache;
pub use completion::{Completion, CompletionEngine, CompletionRequest, EngineConfig};
pub use error::RelayError;
pub use session::{AttemptOutcome, Session, SessionConfig, SessionCoordinator};
pub use stats::{EngineStats, StatsSnapshot};
