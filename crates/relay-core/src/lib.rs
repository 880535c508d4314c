pub mod backend;
pub mod errors;
pub mod ids;
pub mod mode;
pub mod security;

pub use backend::{BackendStatus, CompletionBackend};
pub use errors::BackendError;
pub use ids::MessageId;
pub use mode::{CompletionMode, KeywordModeSelector, ModeSelector};
pub use security::ApiKey;
