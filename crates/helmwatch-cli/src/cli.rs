//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use helmwatch_types::{FatigueLevel, HelmetState};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "helmwatch")]
#[command(author, version, about = "Smart helmet alert monitor with SOS escalation", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Output as JSON (shorthand for --format json)
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file (default: <config dir>/helmwatch/config.toml)
    #[arg(short, long, global = true, env = "HELMWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub endpoints: EndpointArgs,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// The effective output format, honoring `--json`.
    pub fn output_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }
}

/// Endpoint overrides applied on top of the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct EndpointArgs {
    /// Backend API base URL
    #[arg(long, global = true, env = "HELMWATCH_BASE_URL")]
    pub base_url: Option<String>,

    /// WebSocket push URL
    #[arg(long, global = true, env = "HELMWATCH_PUSH_URL")]
    pub push_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the monitor and print updates until Ctrl-C
    ///
    /// While it runs, type `cancel` to stop an emergency countdown or `sos`
    /// to send an SOS immediately.
    Watch {
        /// Do not read commands from stdin
        #[arg(long)]
        no_input: bool,
    },

    /// Poll the backend once and print the status and alert log
    Status,

    /// Send an SOS now
    Sos {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Upload one telemetry report, as the helmet would
    SendDeviceData(DeviceDataArgs),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Helmet connectivity argument
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum HelmetArg {
    #[default]
    Connected,
    Disconnected,
}

impl From<HelmetArg> for HelmetState {
    fn from(arg: HelmetArg) -> Self {
        match arg {
            HelmetArg::Connected => HelmetState::Connected,
            HelmetArg::Disconnected => HelmetState::Disconnected,
        }
    }
}

/// Fatigue level argument
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FatigueArg {
    #[default]
    Normal,
    Tired,
    Critical,
}

impl From<FatigueArg> for FatigueLevel {
    fn from(arg: FatigueArg) -> Self {
        match arg {
            FatigueArg::Normal => FatigueLevel::Normal,
            FatigueArg::Tired => FatigueLevel::Tired,
            FatigueArg::Critical => FatigueLevel::Critical,
        }
    }
}

/// Arguments for `send-device-data`.
#[derive(Debug, Clone, Args)]
pub struct DeviceDataArgs {
    /// Helmet connectivity
    #[arg(long, value_enum, default_value = "connected")]
    pub helmet: HelmetArg,

    /// Report an accident
    #[arg(long)]
    pub accident: bool,

    /// Rider fatigue level
    #[arg(long, value_enum, default_value = "normal")]
    pub fatigue: FatigueArg,

    /// GPS latitude in degrees
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// GPS longitude in degrees
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,
}

/// Configuration subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show configuration file path
    Path,

    /// Check the configuration for errors
    Validate,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_json_flag_overrides_format() {
        let cli = Cli::parse_from(["helmwatch", "--json", "status"]);
        assert_eq!(cli.output_format(), OutputFormat::Json);

        let cli = Cli::parse_from(["helmwatch", "status"]);
        assert_eq!(cli.output_format(), OutputFormat::Text);
    }

    #[test]
    fn test_endpoint_overrides() {
        let cli = Cli::parse_from([
            "helmwatch",
            "watch",
            "--base-url",
            "http://localhost:3000/api",
            "--push-url",
            "ws://localhost:3000/push",
        ]);
        assert_eq!(
            cli.endpoints.base_url.as_deref(),
            Some("http://localhost:3000/api")
        );
        assert_eq!(
            cli.endpoints.push_url.as_deref(),
            Some("ws://localhost:3000/push")
        );
    }

    #[test]
    fn test_device_data_location_requires_both() {
        let result = Cli::try_parse_from(["helmwatch", "send-device-data", "--lat", "59.3"]);
        assert!(result.is_err());

        let cli = Cli::parse_from([
            "helmwatch",
            "send-device-data",
            "--accident",
            "--fatigue",
            "tired",
            "--lat",
            "-33.9",
            "--lon",
            "18.4",
        ]);
        match cli.command {
            Commands::SendDeviceData(args) => {
                assert!(args.accident);
                assert_eq!(args.fatigue, FatigueArg::Tired);
                assert_eq!(args.lat, Some(-33.9));
            }
            _ => panic!("expected send-device-data"),
        }
    }
}
