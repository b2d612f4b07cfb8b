use clap::Parser;
use sms_dispatch::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = cli::load_and_merge_config(&cli)?;
    cli::init_logger_from_settings(&settings)?;

    tracing::debug!(
        version = sms_dispatch::pkg_version(),
        environment = ?cli.env,
        "Starting sms-dispatch"
    );

    cli::execute_command(&cli, settings).await?;
    Ok(())
}
