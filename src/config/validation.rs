//! Configuration validation logic
//!
//! Every section validates its own ranges; `Settings::validate` runs them in
//! order and returns the first failure.

use tokio_cron_scheduler::Job;

use crate::config::environment::Environment;
use crate::config::error::ConfigError;
use crate::config::settings::{
    DatabaseConfig, DeliveryConfig, FileSettings, GatewayConfig, GatewayProvider, LoggerSettings,
    SchedulerConfig, Settings,
};

const VALID_LOG_FORMATS: &[&str] = &["full", "compact", "json"];

/// Longest body the gateway accepts before it splits into too many segments.
pub const MAX_MESSAGE_LENGTH: usize = 1600;

impl DatabaseConfig {
    /// # Validation Rules
    /// - URL must not be empty and must be a Postgres URL
    /// - Max and min connections must be greater than 0, min <= max
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::validation(
                "database.url",
                "Database URL is required. Please specify a valid database connection string.",
            ));
        }

        if !(self.url.starts_with("postgres://") || self.url.starts_with("postgresql://")) {
            return Err(ConfigError::validation(
                "database.url",
                "Invalid database URL format. Expected format: postgres://[user:password@]host[:port]/database",
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::validation(
                "database.max_connections",
                "Max connections must be greater than 0.",
            ));
        }

        if self.min_connections == 0 {
            return Err(ConfigError::validation(
                "database.min_connections",
                "Min connections must be greater than 0.",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::validation(
                "database.min_connections",
                format!(
                    "Min connections ({}) cannot exceed max connections ({}).",
                    self.min_connections, self.max_connections
                ),
            ));
        }

        Ok(())
    }
}

impl FileSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.file.path",
                "File path is required when file logging is enabled.",
            ));
        }

        if !VALID_LOG_FORMATS.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "logger.file.format",
                format!(
                    "Invalid log format '{}'. Valid formats are: {}",
                    self.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

impl LoggerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.level.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.level",
                "Log level cannot be empty.",
            ));
        }

        self.file.validate()
    }
}

impl GatewayConfig {
    /// Credentials are not checked here: a missing credential fails the batch
    /// that needs them, so `migrate` and `status` keep working without them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider == GatewayProvider::Twilio
            && !(self.api_base_url.starts_with("https://") || self.api_base_url.starts_with("http://"))
        {
            return Err(ConfigError::validation(
                "gateway.api_base_url",
                format!("Gateway base URL must be http(s), got '{}'.", self.api_base_url),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::validation(
                "gateway.request_timeout_secs",
                "Gateway request timeout must be greater than 0 seconds.",
            ));
        }

        Ok(())
    }
}

impl SchedulerConfig {
    /// # Validation Rules
    /// - Stale threshold must be greater than 0
    /// - Max lag must not be shorter than the stale threshold
    /// - Poll cron must be a valid six-field expression
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stale_after_minutes == 0 {
            return Err(ConfigError::validation(
                "scheduler.stale_after_minutes",
                "Stale threshold must be greater than 0 minutes.",
            ));
        }

        if self.max_lag_minutes < self.stale_after_minutes {
            return Err(ConfigError::validation(
                "scheduler.max_lag_minutes",
                format!(
                    "Max lag ({} min) cannot be shorter than the stale threshold ({} min).",
                    self.max_lag_minutes, self.stale_after_minutes
                ),
            ));
        }

        if Job::new_async(self.poll_cron.as_str(), |_, _| Box::pin(async {})).is_err() {
            return Err(ConfigError::validation(
                "scheduler.poll_cron",
                format!("Invalid cron expression '{}'.", self.poll_cron),
            ));
        }

        Ok(())
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(phone) = &self.test_phone {
            if !is_e164(phone) {
                return Err(ConfigError::validation(
                    "delivery.test_phone",
                    format!("Test phone '{}' must be in E.164 form (+15551234567).", phone),
                ));
            }
        }

        if self.opt_out_footer.len() > MAX_MESSAGE_LENGTH / 4 {
            return Err(ConfigError::validation(
                "delivery.opt_out_footer",
                "Opt-out footer is too long.",
            ));
        }

        Ok(())
    }
}

impl Settings {
    /// Validate all configuration settings, first error wins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.logger.validate()?;
        self.gateway.validate()?;
        self.scheduler.validate()?;
        self.delivery.validate()?;
        Ok(())
    }

    /// Checks that depend on the deployment environment.
    pub fn validate_for(&self, environment: Environment) -> Result<(), ConfigError> {
        if self.gateway.provider == GatewayProvider::Log && !environment.allows_log_gateway() {
            return Err(ConfigError::validation(
                "gateway.provider",
                "The log gateway cannot be used in production.",
            ));
        }
        Ok(())
    }
}

fn is_e164(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}
