//! netbed Common Library
//!
//! Shared types, errors, configuration and command execution for netbed.

pub mod command;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use command::{CommandExecutor, CommandOutput, ShellExecutor};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use types::*;

/// netbed version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
