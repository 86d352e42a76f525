use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use plantpulse::config::PulseConfig;

#[derive(Parser)]
#[command(
    name = "plantpulse",
    about = "Real-time telemetry aggregation and layered health alerting for manufacturing fleets",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (overrides PLANTPULSE_CONFIG and the
    /// system location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (aggregation engine + viewer API)
    Serve {
        /// Bind address for the viewer API (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<PulseConfig> {
    match path {
        Some(path) => PulseConfig::load(path),
        None => Ok(PulseConfig::load_or_default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            tracing::info!(bind = %config.api.bind, "Starting PlantPulse daemon");
            plantpulse::serve(config).await?;
        }
        Commands::Config => {
            let config = load_config(cli.config.as_ref())?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
