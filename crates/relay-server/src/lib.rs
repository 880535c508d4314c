pub mod handlers;
pub mod server;
pub mod wechat;

pub use handlers::HandlerState;
pub use server::{build_router, start, ServerConfig, ServerHandle};
