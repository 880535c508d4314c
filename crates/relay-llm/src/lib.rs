pub mod openai;
pub mod reliable;

pub mod mock;

pub use mock::{MockBackend, MockResponse};
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use reliable::{ReliableBackend, ReliableConfig};
