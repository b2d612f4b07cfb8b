//! CLI argument parsing with clap
//!
//! This module defines the command-line interface structure using clap,
//! including all commands, arguments, and their documentation.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use jiff::Timestamp;

use crate::build;
use crate::models::Target;

/// Scheduled and immediate bulk SMS delivery
#[derive(Parser, Debug)]
#[command(name = "sms-dispatch")]
#[command(about = "Scheduled and immediate bulk SMS delivery")]
#[command(long_about = "
sms-dispatch delivers bulk SMS to a community pool or to an event's
registrants. Scheduled jobs are claimed by `tick`, which is meant to be run
once per minute by an external scheduler; `worker` runs ticks in-process for
development.

EXAMPLES:
    # Run one scheduler tick (production entry point)
    sms-dispatch tick

    # Poll for due jobs every 30 seconds during development
    sms-dispatch --env development worker

    # Schedule a message for an event's registrants
    sms-dispatch enqueue 'Doors open at 7, {first_name}!' --target event:12 --at 2026-11-01T17:00:00Z

    # Send immediately to the admin test phone
    sms-dispatch send 'Hello {name}' --test-mode

    # Resume a batch that stopped on a transient gateway failure
    sms-dispatch resume 41

    # Replay recorded failures into the suppression lists
    sms-dispatch backfill --batch-size 200

    # Run database migrations
    sms-dispatch migrate
")]
#[command(version = build::CLAP_LONG_VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    ///
    /// Load a single TOML file instead of the layered configuration directory.
    /// The file must exist and be readable.
    ///
    /// Example: --config /etc/sms-dispatch/production.toml
    #[arg(short, long, value_name = "FILE", global = true, value_parser = super::validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Override environment detection
    ///
    /// Selects the `{environment}.toml` overlay and environment-specific checks.
    ///
    /// Available values: development (dev), test, staging (stage), production (prod)
    #[arg(short, long, value_enum, global = true)]
    pub env: Option<Environment>,

    /// Enable verbose logging
    ///
    /// Increases log output to debug level. Cannot be used with --quiet.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-error output
    ///
    /// Reduces log output to error level only. Cannot be used with --verbose.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scheduler tick and exit
    ///
    /// Reclaims stale jobs, claims due jobs and executes each of them. Safe to
    /// run from several hosts at once: every job is claimed by exactly one tick.
    Tick,

    /// Run scheduler ticks on a cron schedule until interrupted
    ///
    /// Development only. Stops gracefully on Ctrl-C.
    Worker {
        /// Six-field cron expression overriding `scheduler.poll_cron`
        ///
        /// Example: --cron '*/10 * * * * *'
        #[arg(long, value_name = "EXPR")]
        cron: Option<String>,
    },

    /// Schedule a message for later delivery
    Enqueue {
        #[command(flatten)]
        message: MessageArgs,

        /// When the job becomes due, as an RFC 3339 timestamp
        #[arg(long, value_name = "TIMESTAMP", value_parser = super::validation::parse_trigger_time)]
        at: Timestamp,
    },

    /// Send a message now and wait for the batch to finish
    Send {
        #[command(flatten)]
        message: MessageArgs,

        /// Delay between two gateway sends in milliseconds, overriding
        /// `delivery.pace_interval_ms`
        #[arg(long, value_name = "MS")]
        pace_ms: Option<u64>,

        /// Stop at the first transient gateway failure so the batch can be resumed
        #[arg(long)]
        halt_on_transient: bool,
    },

    /// Continue a batch left in processing, skipping phones already attempted
    Resume {
        #[arg(value_name = "BATCH_ID", value_parser = super::validation::validate_record_id)]
        batch_id: i64,
    },

    /// Show progress of a batch, or of a scheduled job with --job
    Status {
        #[arg(value_name = "ID", value_parser = super::validation::validate_record_id)]
        id: i64,

        /// Treat the id as a scheduled job id
        #[arg(long)]
        job: bool,

        /// Include per-recipient results of the batch
        #[arg(long, conflicts_with = "job")]
        results: bool,
    },

    /// Cancel a scheduled job that has not been claimed yet
    Cancel {
        #[arg(value_name = "JOB_ID", value_parser = super::validation::validate_record_id)]
        job_id: i64,
    },

    /// Replay recorded failures of finished batches into the suppression lists
    Backfill {
        /// Number of batches loaded per page
        #[arg(long, value_name = "N", default_value = "500", value_parser = super::validation::validate_batch_size)]
        batch_size: i64,
    },

    /// Database migration operations
    ///
    /// Examples:
    ///   sms-dispatch migrate                    # Apply all pending migrations
    ///   sms-dispatch migrate --dry-run          # Show pending migrations without applying
    ///   sms-dispatch migrate --rollback 3       # Rollback the last 3 migrations
    Migrate {
        /// Show pending migrations without applying
        #[arg(long, conflicts_with = "rollback")]
        dry_run: bool,

        /// Number of migrations to rollback (1 to 100)
        #[arg(long, value_name = "STEPS", conflicts_with = "dry_run", value_parser = super::validation::validate_rollback_steps)]
        rollback: Option<u32>,
    },
}

/// Message body and addressing shared by `enqueue` and `send`
#[derive(clap::Args, Debug, Clone)]
pub struct MessageArgs {
    /// Message template; supports {first_name}, {name} and {full_name}
    #[arg(value_name = "MESSAGE")]
    pub text: String,

    /// `community` or `event:<id>`
    #[arg(long, default_value = "community", value_parser = super::validation::parse_target)]
    pub target: Target,

    /// Deliver only to the configured admin test phone
    #[arg(long)]
    pub test_mode: bool,

    /// Append the configured opt-out footer
    #[arg(long)]
    pub footer: bool,
}

/// Environment options
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "test")]
    Test,
    #[value(name = "staging", alias = "stage")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
}

impl Cli {
    /// Checks argument combinations clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Commands::Migrate { dry_run, rollback } if *dry_run && rollback.is_some() => {
                return Err("Cannot use --dry-run and --rollback together".to_string());
            }
            Commands::Enqueue { message, .. } | Commands::Send { message, .. }
                if message.text.trim().is_empty() =>
            {
                return Err("Message cannot be empty".to_string());
            }
            Commands::Worker { cron: Some(cron) } if cron.trim().is_empty() => {
                return Err("--cron cannot be empty".to_string());
            }
            _ => {}
        }

        if self.verbose && self.quiet {
            return Err("Cannot use --verbose and --quiet together".to_string());
        }

        Ok(())
    }
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Test => crate::config::Environment::Test,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_help_flag() {
        let err = Cli::try_parse_from(["sms-dispatch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["sms-dispatch", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["sms-dispatch"]).is_err());
    }

    #[test]
    fn test_tick_command_with_globals_after_subcommand() {
        let cli = Cli::try_parse_from(["sms-dispatch", "tick", "--env", "prod", "-q"]).unwrap();
        assert!(matches!(cli.command, Commands::Tick));
        assert_eq!(cli.env, Some(Environment::Production));
        assert!(cli.quiet);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_enqueue_command() {
        let cli = Cli::try_parse_from([
            "sms-dispatch",
            "enqueue",
            "Hi {first_name}",
            "--target",
            "event:7",
            "--at",
            "2026-11-01T09:00:00Z",
            "--footer",
        ])
        .unwrap();

        let Commands::Enqueue { message, at } = cli.command else {
            panic!("Expected Enqueue command");
        };
        assert_eq!(message.text, "Hi {first_name}");
        assert_eq!(message.target, Target::Event(7));
        assert!(message.footer);
        assert!(!message.test_mode);
        assert_eq!(at.to_string(), "2026-11-01T09:00:00Z");
    }

    #[test]
    fn test_enqueue_requires_trigger_time() {
        let err = Cli::try_parse_from(["sms-dispatch", "enqueue", "Hi"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_send_defaults_to_community() {
        let cli =
            Cli::try_parse_from(["sms-dispatch", "send", "Hello", "--test-mode", "--pace-ms", "0"])
                .unwrap();

        let Commands::Send {
            message,
            pace_ms,
            halt_on_transient,
        } = cli.command
        else {
            panic!("Expected Send command");
        };
        assert_eq!(message.target, Target::Community);
        assert!(message.test_mode);
        assert_eq!(pace_ms, Some(0));
        assert!(!halt_on_transient);
    }

    #[test]
    fn test_invalid_target_rejected() {
        let err = Cli::try_parse_from(["sms-dispatch", "send", "Hi", "--target", "everyone"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_status_command() {
        let cli = Cli::try_parse_from(["sms-dispatch", "status", "12", "--results"]).unwrap();
        let Commands::Status { id, job, results } = cli.command else {
            panic!("Expected Status command");
        };
        assert_eq!(id, 12);
        assert!(!job);
        assert!(results);

        let err = Cli::try_parse_from(["sms-dispatch", "status", "12", "--job", "--results"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_backfill_default_batch_size() {
        let cli = Cli::try_parse_from(["sms-dispatch", "backfill"]).unwrap();
        assert!(matches!(cli.command, Commands::Backfill { batch_size: 500 }));
    }

    #[test]
    fn test_migrate_command() {
        let cli = Cli::try_parse_from(["sms-dispatch", "migrate", "--dry-run"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Migrate {
                dry_run: true,
                rollback: None
            }
        ));
    }

    #[test]
    fn test_conflicting_verbose_quiet() {
        let err =
            Cli::try_parse_from(["sms-dispatch", "--verbose", "--quiet", "tick"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_validate_rejects_blank_message() {
        let cli = Cli::try_parse_from(["sms-dispatch", "send", "   "]).unwrap();
        assert_eq!(cli.validate().unwrap_err(), "Message cannot be empty");
    }
}
