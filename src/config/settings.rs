//! Configuration settings structures for sms-dispatch
//!
//! This module defines all configuration structures that can be loaded from
//! TOML files and environment variables.

use std::path::PathBuf;
use std::time::Duration;

use jiff::SignedDuration;
use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;
use crate::logger::{ConsoleConfig, FileConfig, LogFormat, LoggerConfig};

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "sms-dispatch".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "logs/sms-dispatch.log".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_gateway_base_url() -> String {
    "https://api.twilio.com".to_string()
}

fn default_gateway_timeout() -> u64 {
    15
}

fn default_stale_after_minutes() -> u64 {
    10
}

fn default_max_lag_minutes() -> u64 {
    1440
}

fn default_poll_cron() -> String {
    "*/30 * * * * *".to_string()
}

fn default_claim_retry_attempts() -> u32 {
    3
}

fn default_claim_retry_backoff_ms() -> u64 {
    50
}

fn default_pace_interval_ms() -> u64 {
    100
}

fn default_opt_out_footer() -> String {
    "Reply STOP to unsubscribe.".to_string()
}

// ============================================================================
// Application Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    #[serde(default = "default_app_version")]
    pub version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

// ============================================================================
// Database Configuration
// ============================================================================

/// Diesel database connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[serde(default)]
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections kept in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Whether to run pending migrations before a tick or worker starts
    #[serde(default)]
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout: default_connection_timeout(),
            auto_migrate: false,
        }
    }
}

// ============================================================================
// Logger Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            colored: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_log_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub append: bool,

    /// Log format: "full", "compact", or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
            append: default_true(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Level or `EnvFilter` directive string
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub console: ConsoleSettings,

    #[serde(default)]
    pub file: FileSettings,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: ConsoleSettings::default(),
            file: FileSettings::default(),
        }
    }
}

impl LoggerSettings {
    /// Convert the file representation into the runtime LoggerConfig
    pub fn into_logger_config(self) -> Result<LoggerConfig, ConfigError> {
        let console = ConsoleConfig::new(self.console.enabled, self.console.colored);
        let file = self.file.into_file_config()?;

        LoggerConfig::new(console, file, self.level)
            .map_err(|e| ConfigError::validation("logger", e.to_string()))
    }
}

impl FileSettings {
    pub fn into_file_config(self) -> Result<FileConfig, ConfigError> {
        let format = self
            .format
            .parse::<LogFormat>()
            .map_err(|e| ConfigError::validation("logger.file.format", e.to_string()))?;

        FileConfig::new(self.enabled, PathBuf::from(self.path), self.append, format)
            .map_err(|e| ConfigError::validation("logger.file", e.to_string()))
    }
}

// ============================================================================
// Gateway Configuration
// ============================================================================

/// Which SMS gateway implementation sends messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayProvider {
    #[default]
    Twilio,
    /// Accepts every message and only logs it
    Log,
}

/// Outbound SMS gateway credentials and transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub provider: GatewayProvider,

    #[serde(default)]
    pub account_sid: String,

    #[serde(default)]
    pub auth_token: String,

    /// Sender number in E.164 form
    #[serde(default)]
    pub from_number: String,

    #[serde(default = "default_gateway_base_url")]
    pub api_base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_gateway_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: GatewayProvider::default(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            api_base_url: default_gateway_base_url(),
            request_timeout_secs: default_gateway_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Names of the credential keys that are still empty.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.account_sid.trim().is_empty() {
            missing.push("gateway.account_sid");
        }
        if self.auth_token.trim().is_empty() {
            missing.push("gateway.auth_token");
        }
        if self.from_number.trim().is_empty() {
            missing.push("gateway.from_number");
        }
        missing
    }
}

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Claiming, expiry and development poller settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// A `processing` job older than this is considered abandoned
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: u64,

    /// Jobs claimed later than this after their trigger time are expired
    #[serde(default = "default_max_lag_minutes")]
    pub max_lag_minutes: u64,

    /// Six-field cron expression for the development poller
    #[serde(default = "default_poll_cron")]
    pub poll_cron: String,

    /// How often a contended claim is retried before giving up on the job
    #[serde(default = "default_claim_retry_attempts")]
    pub claim_retry_attempts: u32,

    /// Base backoff between claim retries, doubled on every attempt
    #[serde(default = "default_claim_retry_backoff_ms")]
    pub claim_retry_backoff_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stale_after_minutes: default_stale_after_minutes(),
            max_lag_minutes: default_max_lag_minutes(),
            poll_cron: default_poll_cron(),
            claim_retry_attempts: default_claim_retry_attempts(),
            claim_retry_backoff_ms: default_claim_retry_backoff_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn stale_threshold(&self) -> SignedDuration {
        SignedDuration::from_mins(self.stale_after_minutes as i64)
    }

    pub fn max_lag(&self) -> SignedDuration {
        SignedDuration::from_mins(self.max_lag_minutes as i64)
    }

    pub fn claim_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.claim_retry_backoff_ms)
    }
}

// ============================================================================
// Delivery Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Minimum delay between two consecutive gateway sends
    #[serde(default = "default_pace_interval_ms")]
    pub pace_interval_ms: u64,

    /// Stop a batch at the first transient gateway failure
    #[serde(default)]
    pub raise_on_transient: bool,

    /// Destination used for every test-mode send
    #[serde(default)]
    pub test_phone: Option<String>,

    /// Text appended when a request asks for the opt-out footer
    #[serde(default = "default_opt_out_footer")]
    pub opt_out_footer: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            pace_interval_ms: default_pace_interval_ms(),
            raise_on_transient: false,
            test_phone: None,
            opt_out_footer: default_opt_out_footer(),
        }
    }
}

impl DeliveryConfig {
    pub fn pace_interval(&self) -> Duration {
        Duration::from_millis(self.pace_interval_ms)
    }
}

// ============================================================================
// Main Settings Structure
// ============================================================================

/// Complete application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logger: LoggerSettings,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,
}
