//! rdiag: diagnostic collection orchestrator.
//!
//! Collectors and triggers live under [`core`]; [`commands`] holds the CLI
//! front end built on top of [`TaskHandler`].

pub mod error;
pub use error::{DiagError, Result};

pub mod commands;
pub mod core;

pub use core::config::Config;
pub use core::session::Session;
pub use core::task::{RunInfo, RunStatus, Task, TaskHandler};

/// Log at Info unless `RUST_LOG` says otherwise
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env).format_timestamp_millis().try_init();
}
