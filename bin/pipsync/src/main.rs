mod commands;

use clap::{Parser, Subcommand};
use pipsync_core::logging::init_logging;
use pipsync_core::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pipsync")]
#[command(about = "Picture-in-picture sync runtime", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON). Defaults are used when absent.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Run the runtime against an in-memory page driven by a script
    Simulate {
        /// Script file (JSON)
        script: PathBuf,

        /// Only print the final summary, not every published event
        #[arg(short, long)]
        quiet: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write the default configuration to a file
    Init {
        /// Destination (defaults to --config)
        path: Option<PathBuf>,

        /// Force overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if cli.verbose {
        config.debug_logging = true;
    }
    init_logging(&config);

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show(&config, cli.config.as_deref())?;
            }
            ConfigCommands::Init { path, force } => {
                let target = path.or(cli.config).ok_or_else(|| {
                    anyhow::anyhow!("No destination given; pass a path or --config")
                })?;
                commands::config_cmd::init(&target, force)?;
            }
        },
        Commands::Simulate { script, quiet } => {
            commands::simulate::run(config, &script, !quiet).await?;
        }
    }

    Ok(())
}
