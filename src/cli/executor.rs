//! Command executor for dispatching CLI commands
//!
//! This module provides the main entry point for executing CLI commands
//! after parsing and configuration loading.

use tokio_util::sync::CancellationToken;

use super::handlers::{
    DispatchCommandHandler, MigrateCommandHandler, SchedulerCommandHandler, print_json,
};
use super::parser::{Cli, Commands};
use crate::config::settings::Settings;
use crate::error::{AppError, AppResult};
use crate::services::DispatchService;
use crate::state::AppState;

/// Execute a CLI command with the given settings
///
/// `migrate` only needs the database settings; every other command connects
/// the pool, optionally applies pending migrations and runs against the
/// dispatch service.
pub async fn execute_command(cli: &Cli, settings: Settings) -> AppResult<()> {
    validate_command_args(cli)?;

    if let Commands::Migrate { dry_run, rollback } = &cli.command {
        return MigrateCommandHandler::new(settings.database)
            .execute(*dry_run, *rollback)
            .await;
    }

    if settings.database.auto_migrate {
        MigrateCommandHandler::new(settings.database.clone())
            .run_pending()
            .await?;
    }

    let poll_cron = settings.scheduler.poll_cron.clone();
    let state = AppState::connect(settings).await?;
    run_command(&cli.command, state.services, &poll_cron).await
}

/// Runs a delivery or scheduler command and prints its result.
pub(crate) async fn run_command(
    command: &Commands,
    service: DispatchService,
    poll_cron: &str,
) -> AppResult<()> {
    match command {
        Commands::Tick => print_json(&SchedulerCommandHandler::new(service).tick().await?),
        Commands::Worker { .. } => {
            SchedulerCommandHandler::new(service)
                .worker(poll_cron, CancellationToken::new())
                .await
        }
        Commands::Enqueue { message, at } => {
            print_json(&DispatchCommandHandler::new(service).enqueue(message, *at).await?)
        }
        Commands::Send { message, .. } => {
            print_json(&DispatchCommandHandler::new(service).send(message).await?)
        }
        Commands::Resume { batch_id } => {
            print_json(&DispatchCommandHandler::new(service).resume(*batch_id).await?)
        }
        Commands::Status { id, job, results } => print_json(
            &DispatchCommandHandler::new(service)
                .status(*id, *job, *results)
                .await?,
        ),
        Commands::Cancel { job_id } => {
            print_json(&DispatchCommandHandler::new(service).cancel(*job_id).await?)
        }
        Commands::Backfill { batch_size } => {
            print_json(&DispatchCommandHandler::new(service).backfill(*batch_size).await?)
        }
        Commands::Migrate { .. } => Err(AppError::invalid_state(
            "migrate runs without the dispatch service",
        )),
    }
}

/// Validate command arguments before touching the database.
fn validate_command_args(cli: &Cli) -> AppResult<()> {
    cli.validate()
        .map_err(|reason| AppError::validation("cli_arguments", reason))?;

    if let Commands::Migrate {
        rollback: Some(steps),
        ..
    } = &cli.command
        && *steps > 50
    {
        tracing::warn!(
            steps,
            "Rolling back this many migrations is a large operation"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SchedulerConfig;
    use crate::services::testing::{ScriptedGateway, delivery_config, memory_repositories};
    use clap::Parser;

    fn service() -> DispatchService {
        let (store, repos) = memory_repositories();
        store.add_member("+15554440001", Some("Dee"));
        DispatchService::new(
            repos,
            Arc::new(ScriptedGateway::new()),
            &SchedulerConfig::default(),
            &delivery_config(),
        )
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_validate_rejects_blank_message() {
        let cli = parse(&["sms-dispatch", "send", " "]);
        match validate_command_args(&cli) {
            Err(AppError::Validation { field, .. }) => assert_eq!(field, "cli_arguments"),
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_conflicting_migrate_args() {
        let cli = Cli {
            command: Commands::Migrate {
                dry_run: true,
                rollback: Some(5),
            },
            config: None,
            env: None,
            verbose: false,
            quiet: false,
        };
        assert!(validate_command_args(&cli).is_err());
    }

    #[tokio::test]
    async fn test_run_send_and_tick() {
        let service = service();
        let poll_cron = SchedulerConfig::default().poll_cron;

        let send = parse(&["sms-dispatch", "send", "Hi {name}"]);
        run_command(&send.command, service.clone(), &poll_cron)
            .await
            .unwrap();

        let tick = parse(&["sms-dispatch", "tick"]);
        run_command(&tick.command, service.clone(), &poll_cron)
            .await
            .unwrap();

        let status = parse(&["sms-dispatch", "status", "1"]);
        run_command(&status.command, service, &poll_cron)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_propagates_not_found() {
        let cli = parse(&["sms-dispatch", "cancel", "77"]);
        let err = run_command(&cli.command, service(), "*/30 * * * * *")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }
}
