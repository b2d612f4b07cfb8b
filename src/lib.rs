//! sms-dispatch library
//!
//! Scheduled and immediate bulk SMS delivery: job claiming, batch
//! orchestration, paced gateway sends and failure-driven suppression.

use shadow_rs::shadow;
shadow!(build);

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logger;
pub mod models;
pub mod repositories;
pub mod schema;
pub mod services;
pub mod state;

pub use state::AppState;

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}
