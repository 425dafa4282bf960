mod config;
mod handlers;
mod server;
mod state;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{ServiceConfig, DEFAULT_UPLOAD_BODY_MAX_BYTES};
pub use server::run_server;
