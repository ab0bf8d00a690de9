//! HTTP surface of the Bloom wellness assistant.

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::{AppConfig, ServerConfig};
pub use error::{ApiError, ApiResult};
pub use server::{build_orchestrator, create_router, serve, AppState};
