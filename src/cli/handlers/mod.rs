//! Command handlers for CLI operations
//!
//! This module contains handlers for different CLI commands,
//! separating command execution logic from parsing and validation.

pub mod dispatch;
pub mod migrate;
pub mod scheduler;

pub use dispatch::{DispatchCommandHandler, StatusReport};
pub use migrate::MigrateCommandHandler;
pub use scheduler::SchedulerCommandHandler;

use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Prints a command result as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| AppError::Internal {
        source: anyhow::Error::from(e),
    })?;
    println!("{}", rendered);
    Ok(())
}
