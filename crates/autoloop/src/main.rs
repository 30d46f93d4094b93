//! autoloop - plan, execute, observe until done

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{init_command, ping_command, run_command, status_command, RunOverrides};

/// autoloop - autonomous shell agent driven by an instructions file
#[derive(Parser)]
#[command(name = "autoloop")]
#[command(about = "◆ Autonomous plan-execute-observe loop for shell tasks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Config file (default: ./autoloop.json, then ~/.autoloop/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the loop until done or out of cycles
    Run {
        /// Instructions file
        #[arg(short, long)]
        instructions: Option<String>,
        /// Workspace root
        #[arg(short, long)]
        workspace: Option<String>,
        /// Cycle budget
        #[arg(short, long)]
        max_cycles: Option<u32>,
    },
    /// Initialize config and instructions template
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },
    /// Check model connectivity with a single request
    Ping {
        /// Model to ask (default: first candidate)
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Show resolved configuration
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.config;
    let code = match cli.command {
        Commands::Run {
            instructions,
            workspace,
            max_cycles,
        } => {
            let overrides = RunOverrides {
                instructions,
                workspace,
                max_cycles,
            };
            match run_command(config.as_deref(), overrides).await {
                Ok(code) => code,
                Err(e) => {
                    error!("[FATAL] {:#}", e);
                    1
                }
            }
        }
        Commands::Init { force } => match init_command(config.as_deref(), force).await {
            Ok(()) => 0,
            Err(e) => {
                error!("Init failed: {:#}", e);
                1
            }
        },
        Commands::Ping { model } => match ping_command(config.as_deref(), model).await {
            Ok(()) => 0,
            Err(e) => {
                error!("Ping failed: {:#}", e);
                1
            }
        },
        Commands::Status => match status_command(config.as_deref()).await {
            Ok(()) => 0,
            Err(e) => {
                error!("Status failed: {:#}", e);
                1
            }
        },
    };

    std::process::exit(code);
}
