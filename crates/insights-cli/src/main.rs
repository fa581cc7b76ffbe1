mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// insights -- inspect and exercise a telemetry configuration.
#[derive(Parser)]
#[command(name = "insights", version, about)]
struct Cli {
    /// Diagnostic log level for the tool itself.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a config file and report every dropped definition.
    Check {
        /// Path to the TOML config. Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the merged metric catalog as JSON.
    Catalog {
        /// Path to the TOML config. Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// TOML file with extra `[[metrics]]` owned by the application.
        #[arg(long)]
        app: Option<PathBuf>,
    },

    /// Emit simulated request telemetry through every configured backend.
    Demo {
        /// Path to the TOML config. Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of simulated requests.
        #[arg(long, default_value_t = 20)]
        requests: usize,
        /// Number of concurrent worker tasks.
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    insights_core::logging::init_logging("insights", &cli.log_level);

    match cli.command {
        Commands::Check { config } => {
            commands::check::run(config.as_deref())?;
        }
        Commands::Catalog { config, app } => {
            commands::catalog::run(config.as_deref(), app.as_deref())?;
        }
        Commands::Demo {
            config,
            requests,
            workers,
        } => {
            commands::demo::run(config.as_deref(), requests, workers).await?;
        }
    }

    Ok(())
}
