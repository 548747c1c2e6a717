pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod server;
pub mod translate;

pub use backend::{BedrockClient, EventSource, InferenceBackend};
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use server::{build_router, AppState};
