//! Configuration merger for CLI arguments and config files
//!
//! This module handles merging CLI argument overrides with file-based configuration,
//! implementing the configuration precedence logic.

use std::path::Path;

use super::parser::{Cli, Commands};
use crate::config::error::ConfigError;
use crate::config::{ConfigLoader, Environment, settings::Settings};

/// Applies CLI overrides on top of file-based configuration.
///
/// CLI arguments have the highest priority, above `DISPATCH_*` variables.
pub struct ConfigurationMerger {
    base_config: Settings,
    environment: Environment,
}

impl ConfigurationMerger {
    pub fn new(base_config: Settings, environment: Environment) -> Self {
        Self {
            base_config,
            environment,
        }
    }

    /// Loads the base configuration the CLI points at.
    ///
    /// `--config` selects single-file mode; `--env` overrides `DISPATCH_APP_ENV`.
    ///
    /// # Errors
    /// Returns ConfigError if configuration loading or validation fails
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut loader = ConfigLoader::new()?;

        if let Some(path) = cli.config.as_deref() {
            Self::validate_config_file_access(path)?;
            loader = loader.with_config_file(path);
        }
        if let Some(env) = cli.env {
            loader = loader.with_environment(env.into());
        }

        let environment = loader.environment();
        Ok(Self::new(loader.load()?, environment))
    }

    /// The file may have disappeared between argument parsing and loading.
    fn validate_config_file_access(path: &Path) -> Result<(), ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::validation(
                "config_file",
                format!("Configuration file does not exist: '{}'", path.display()),
            ));
        }

        std::fs::File::open(path).map(|_| ()).map_err(|e| {
            ConfigError::validation(
                "config_file",
                format!("Cannot read configuration file '{}': {}", path.display(), e),
            )
        })
    }

    /// Returns a new Settings instance with CLI overrides applied and validated.
    pub fn merge_cli_args(&self, cli: &Cli) -> Result<Settings, ConfigError> {
        let mut config = self.base_config.clone();

        Self::apply_global_overrides(&mut config, cli);
        Self::apply_command_overrides(&mut config, &cli.command);

        config.validate()?;
        config.validate_for(self.environment)?;

        Ok(config)
    }

    fn apply_global_overrides(config: &mut Settings, cli: &Cli) {
        if cli.verbose {
            config.logger.level = "debug".to_string();
        } else if cli.quiet {
            config.logger.level = "error".to_string();
        }
    }

    fn apply_command_overrides(config: &mut Settings, command: &Commands) {
        match command {
            Commands::Worker { cron: Some(cron) } => {
                config.scheduler.poll_cron = cron.trim().to_string();
            }
            Commands::Send {
                pace_ms,
                halt_on_transient,
                ..
            } => {
                if let Some(pace) = pace_ms {
                    config.delivery.pace_interval_ms = *pace;
                }
                if *halt_on_transient {
                    config.delivery.raise_on_transient = true;
                }
            }
            _ => {}
        }
    }

    pub fn config(&self) -> &Settings {
        &self.base_config
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn create_valid_base_config() -> Settings {
        let mut config = Settings::default();
        config.database.url = "postgres://localhost/dispatch".to_string();
        config
    }

    fn merge(args: &[&str]) -> Result<Settings, ConfigError> {
        let merger = ConfigurationMerger::new(create_valid_base_config(), Environment::Development);
        let cli = Cli::try_parse_from(args).unwrap();
        merger.merge_cli_args(&cli)
    }

    #[test]
    fn test_configuration_merger_new() {
        let base_config = create_valid_base_config();
        let merger = ConfigurationMerger::new(base_config.clone(), Environment::Test);
        assert_eq!(merger.config(), &base_config);
        assert_eq!(merger.environment(), Environment::Test);
    }

    #[test]
    fn test_verbose_flag_sets_debug() {
        let merged = merge(&["sms-dispatch", "--verbose", "tick"]).unwrap();
        assert_eq!(merged.logger.level, "debug");
    }

    #[test]
    fn test_quiet_flag_sets_error() {
        let merged = merge(&["sms-dispatch", "tick", "--quiet"]).unwrap();
        assert_eq!(merged.logger.level, "error");
    }

    #[test]
    fn test_worker_cron_override() {
        let merged = merge(&["sms-dispatch", "worker", "--cron", "*/5 * * * * *"]).unwrap();
        assert_eq!(merged.scheduler.poll_cron, "*/5 * * * * *");
    }

    #[test]
    fn test_invalid_worker_cron_fails_validation() {
        match merge(&["sms-dispatch", "worker", "--cron", "soon"]) {
            Err(ConfigError::ValidationError { field, .. }) => {
                assert_eq!(field, "scheduler.poll_cron")
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_send_delivery_overrides() {
        let merged = merge(&[
            "sms-dispatch",
            "send",
            "Hi",
            "--pace-ms",
            "250",
            "--halt-on-transient",
        ])
        .unwrap();
        assert_eq!(merged.delivery.pace_interval_ms, 250);
        assert!(merged.delivery.raise_on_transient);
    }

    #[test]
    fn test_other_commands_keep_base_values() {
        let merged = merge(&["sms-dispatch", "status", "3"]).unwrap();
        assert_eq!(merged, create_valid_base_config());
    }

    #[test]
    fn test_environment_checks_applied() {
        let mut base = create_valid_base_config();
        base.gateway.provider = crate::config::GatewayProvider::Log;
        let merger = ConfigurationMerger::new(base, Environment::Production);
        let cli = Cli::try_parse_from(["sms-dispatch", "tick"]).unwrap();
        assert!(merger.merge_cli_args(&cli).is_err());
    }
}
