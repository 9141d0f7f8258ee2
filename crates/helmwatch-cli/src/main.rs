use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;
mod util;

use cli::{Cli, Commands};
use commands::{WatchArgs, cmd_config, cmd_send_device_data, cmd_sos, cmd_status, cmd_watch};
use config::Config;
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let format = cli.output_format();
    let opts = FormatOptions::new(cli.no_color);

    // Config subcommands report load and validation problems themselves.
    if let Commands::Config { action } = &cli.command {
        return cmd_config(action, cli.config.as_deref(), &cli.endpoints, format);
    }

    let mut config = Config::load_from(cli.config.as_deref())?;
    config.apply_overrides(&cli.endpoints);
    config.validate()?;

    match &cli.command {
        Commands::Watch { no_input } => {
            cmd_watch(WatchArgs {
                config: &config,
                format,
                no_input: *no_input,
                quiet: cli.quiet,
                opts: &opts,
            })
            .await
        }
        Commands::Status => cmd_status(&config, format, &opts).await,
        Commands::Sos { yes } => cmd_sos(&config, *yes, format, &opts).await,
        Commands::SendDeviceData(args) => cmd_send_device_data(&config, args, format).await,
        Commands::Config { .. } => Ok(()),
    }
}
