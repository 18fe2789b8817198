//! modelhub CLI
//!
//! Serves the HTTP and RPC surfaces and exposes the maintenance operations
//! (dataset sync and pull, remote model fetch) from the shell.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;

use crate::config::Settings;
use crate::server::{run_server, ServerConfig};
use crate::service::Hub;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString { s.truecolor(100, 210, 120) }

fn kv(key: &str, val: &str) {
    println!("  {:<12} {}", muted(key), val.white());
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_fail(msg: &str) {
    println!("  {} {}", "✗".red(), msg);
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "modelhub")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train, version, track and serve tabular classifiers")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API and the RPC endpoint (default)
    Serve {
        /// HTTP host, overrides API_HOST
        #[arg(long)]
        host: Option<String>,

        /// HTTP port, overrides API_PORT
        #[arg(short, long)]
        port: Option<u16>,

        /// RPC port, overrides GRPC_PORT
        #[arg(long)]
        rpc_port: Option<u16>,
    },

    /// List the trainable model types and their default hyperparameters
    Types,

    /// List stored datasets
    Datasets,

    /// Re-add and push every dataset to the DVC remote
    Sync,

    /// Pull datasets from the DVC remote
    Pull {
        /// Stored file name, e.g. iris.csv; all tracked files when omitted
        dataset: Option<String>,
    },

    /// Download a model artifact registered with ClearML
    Fetch {
        /// Model name
        model: String,
    },
}

// ─── Commands ──────────────────────────────────────────────────────────────────

/// Apply command-line overrides on top of the environment settings.
pub fn server_config(
    settings: &Settings,
    host: Option<String>,
    port: Option<u16>,
    rpc_port: Option<u16>,
) -> ServerConfig {
    let mut config = ServerConfig::from_settings(settings);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(rpc_port) = rpc_port {
        config.rpc_port = rpc_port;
    }
    config
}

pub fn cmd_serve(config: ServerConfig, hub: Hub) -> anyhow::Result<()> {
    section(&format!("modelhub v{}", env!("CARGO_PKG_VERSION")));
    kv("API", &format!("http://{}:{}/api", config.host, config.port));
    kv("Health", &format!("http://{}:{}/health", config.host, config.port));
    kv("RPC", &format!("http://{}:{}/rpc", config.rpc_host, config.rpc_port));
    kv("Tracking", if hub.tracking_enabled() { "clearml" } else { "off" });
    kv("Versioning", if hub.versioning_enabled() { "dvc" } else { "off" });
    println!();
    println!("  {}", dim("ctrl+c to stop"));
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    // Keep one handle out here so the hub (and its blocking HTTP client) is
    // dropped after the runtime stops.
    let hub = Arc::new(hub);
    runtime.block_on(run_server(config, Arc::clone(&hub)))
}

pub fn cmd_types(hub: &Hub) -> anyhow::Result<()> {
    section("Model types");
    for info in hub.model_types() {
        println!("  {}  {}", accent(&info.name), muted(&info.description));
        println!("    {}", dim(&serde_json::to_string(&info.default_hyperparameters)?));
    }
    println!();
    Ok(())
}

pub fn cmd_datasets(hub: &Hub) -> anyhow::Result<()> {
    section("Datasets");
    let tracked = hub.tracked_datasets();
    let datasets = hub.list_datasets()?;
    if datasets.is_empty() {
        println!("  {}", dim("no datasets stored"));
    }
    for record in datasets {
        let rows = record
            .row_count
            .map(|r| r.to_string())
            .unwrap_or_else(|| "?".to_string());
        let marker = if tracked.contains(&record.name) { ok("dvc") } else { dim("local") };
        println!(
            "  {:<28} {:>8} rows {:>10} bytes  {}",
            record.name, rows, record.size, marker
        );
    }
    println!();
    Ok(())
}

pub fn cmd_sync(hub: &Hub) -> anyhow::Result<()> {
    section("Sync datasets");
    let summary = hub.sync_datasets()?;
    if !summary.versioning_enabled {
        println!("  {}", "DVC is not available, nothing synced".yellow());
        println!();
        return Ok(());
    }
    for name in &summary.synced {
        step_ok(name);
    }
    for name in &summary.failed {
        step_fail(name);
    }
    println!();
    if !summary.failed.is_empty() {
        anyhow::bail!("{} dataset(s) failed to sync", summary.failed.len());
    }
    Ok(())
}

pub fn cmd_pull(hub: &Hub, dataset: Option<&str>) -> anyhow::Result<()> {
    section("Pull datasets");
    if !hub.versioning_enabled() {
        println!("  {}", "DVC is not available, nothing pulled".yellow());
        println!();
        return Ok(());
    }
    let target = dataset.unwrap_or("all tracked datasets");
    if hub.pull_datasets(dataset)? {
        step_ok(target);
        println!();
        Ok(())
    } else {
        step_fail(target);
        println!();
        anyhow::bail!("DVC pull failed for {}", target)
    }
}

pub fn cmd_fetch(hub: &Hub, model: &str) -> anyhow::Result<()> {
    section("Fetch model");
    if !hub.tracking_enabled() {
        anyhow::bail!("ClearML tracking is not configured");
    }
    let path = hub.fetch_model(model)?;
    step_ok(&format!("{} -> {}", model, path.display()));
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve_overrides() {
        let cli = Cli::parse_from(["modelhub", "serve", "--port", "9000", "--rpc-port", "9001"]);
        match cli.command {
            Some(Commands::Serve { host, port, rpc_port }) => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9000));
                assert_eq!(rpc_port, Some(9001));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_server_config_overrides() {
        let settings = Settings::default();
        let config = server_config(&settings, Some("127.0.0.1".into()), None, Some(6000));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8000);
        assert_eq!(config.rpc_port, 6000);
    }

    #[test]
    fn test_cli_parses_pull() {
        let cli = Cli::parse_from(["modelhub", "pull", "iris.csv"]);
        assert!(matches!(cli.command, Some(Commands::Pull { dataset: Some(ref d) }) if d == "iris.csv"));
        let cli = Cli::parse_from(["modelhub"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_local_commands() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Hub::local(dir.path()).unwrap();
        cmd_types(&hub).unwrap();
        cmd_datasets(&hub).unwrap();
        cmd_sync(&hub).unwrap();
        cmd_pull(&hub, None).unwrap();
        assert!(cmd_fetch(&hub, "m").is_err());
    }
}
