//! limbo - command-line front end for the plugin runtime.
//!
//! Manages the plugins directory of a limbo installation without starting
//! the desktop app: install, enable, configure and test-load plugins.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod plugin_cmd;

use plugin_cmd::PluginCli;

/// Limbo plugin management.
#[derive(Debug, Parser)]
#[command(name = "limbo", version, about)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging
    #[arg(long, global = true)]
    trace: bool,

    /// Runtime configuration file (TOML)
    #[arg(long, global = true, env = "LIMBO_CONFIG")]
    config: Option<PathBuf>,

    /// Override the plugins directory
    #[arg(long, global = true, env = "LIMBO_PLUGINS_DIR")]
    plugins_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Manage installed plugins
    Plugin(PluginCli),
}

fn init_logging(cli: &Cli) {
    let filter = if cli.trace {
        "trace".to_string()
    } else if cli.verbose {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("LIMBO_LOG") {
        level
    } else if let Ok(filter) = std::env::var("RUST_LOG") {
        filter
    } else {
        "warn".to_string()
    };

    tracing_subscriber::fmt()
        .with_env_filter(&filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = plugin_cmd::load_config(cli.config.as_deref(), cli.plugins_dir)?;
    match cli.command {
        Commands::Plugin(plugin_cli) => plugin_cli.run(config).await,
    }
}
