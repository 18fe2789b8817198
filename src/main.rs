//! modelhub - Main Entry Point
//!
//! Runs the HTTP and RPC servers, or one of the maintenance commands.

use clap::Parser;
use modelhub::cli::{cmd_datasets, cmd_fetch, cmd_pull, cmd_serve, cmd_sync, cmd_types, server_config, Cli, Commands};
use modelhub::config::Settings;
use modelhub::service::Hub;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelhub=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    // The tracking client is blocking; build it before any runtime exists.
    let hub = Hub::new(&settings)?;

    match cli.command {
        Some(Commands::Serve { host, port, rpc_port }) => {
            cmd_serve(server_config(&settings, host, port, rpc_port), hub)?;
        }
        Some(Commands::Types) => cmd_types(&hub)?,
        Some(Commands::Datasets) => cmd_datasets(&hub)?,
        Some(Commands::Sync) => cmd_sync(&hub)?,
        Some(Commands::Pull { dataset }) => cmd_pull(&hub, dataset.as_deref())?,
        Some(Commands::Fetch { model }) => cmd_fetch(&hub, &model)?,
        None => {
            cmd_serve(server_config(&settings, None, None, None), hub)?;
        }
    }

    Ok(())
}
