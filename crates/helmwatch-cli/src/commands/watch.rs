//! Watch command implementation.
//!
//! Runs the full monitor: push subscription with polling fallback, the
//! emergency countdown and automatic SOS. Updates are printed as they happen.
//! Commands typed on stdin (`cancel`, `sos`, `trigger`, `status`, `quit`)
//! reach the running monitor.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use helmwatch_core::{
    CancelOutcome, DisabledPush, Error, Monitor, MonitorEvent, MonitorHandle, PushChannel,
    WsPushChannel,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::http_backend;
use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{
    FormatOptions, format_dispatch_text, format_event_text, format_json, format_snapshot_text,
};
use crate::util::write_output;

/// Arguments for the watch command.
pub struct WatchArgs<'a> {
    pub config: &'a Config,
    pub format: OutputFormat,
    pub no_input: bool,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
}

/// A line typed by the user while watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputCommand {
    Cancel,
    Sos,
    Trigger,
    Status,
    Help,
    Quit,
}

impl InputCommand {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "c" | "cancel" => Some(Self::Cancel),
            "sos" => Some(Self::Sos),
            "t" | "trigger" => Some(Self::Trigger),
            "s" | "status" => Some(Self::Status),
            "h" | "help" | "?" => Some(Self::Help),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

const INPUT_HELP: &str = "Commands: cancel, sos, trigger, status, quit";

type InputLines = Lines<BufReader<Stdin>>;

/// The configured push channel, or [`DisabledPush`] when none is set.
fn push_channel(config: &Config) -> Result<Arc<dyn PushChannel>> {
    match &config.push.url {
        Some(url) => Ok(Arc::new(
            WsPushChannel::new(url)?.connect_timeout(config.connect_timeout()),
        )),
        None => {
            info!("No push URL configured, running on polling only");
            Ok(Arc::new(DisabledPush))
        }
    }
}

pub async fn cmd_watch(args: WatchArgs<'_>) -> Result<()> {
    let WatchArgs {
        config,
        format,
        no_input,
        quiet,
        opts,
    } = args;

    let http = Arc::new(http_backend(config)?);
    let push = push_channel(config)?;
    let monitor = Monitor::spawn(config.to_monitor_config(), push, http.clone(), http)?;
    let mut events = monitor.subscribe_events();

    if !quiet {
        eprintln!(
            "Watching {} (Ctrl-C to stop)",
            config.backend.base_url
        );
        if !no_input {
            eprintln!("{}", INPUT_HELP);
        }
    }
    if format == OutputFormat::Text {
        write_output(&format_snapshot_text(&monitor.snapshot(), opts))?;
    }

    let mut input: Option<InputLines> =
        (!no_input).then(|| BufReader::new(tokio::io::stdin()).lines());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                if !quiet {
                    eprintln!("\nStopping...");
                }
                break Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, format, opts)?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Output fell behind, skipped {} events", skipped);
                    if format == OutputFormat::Text {
                        write_output(&format_snapshot_text(&monitor.snapshot(), opts))?;
                    }
                }
                Err(RecvError::Closed) => break Err(anyhow!(Error::MonitorStopped)),
            },
            line = next_line(&mut input) => match line {
                Ok(Some(line)) => match InputCommand::parse(&line) {
                    Some(InputCommand::Quit) => break Ok(()),
                    Some(command) => run_input(command, &monitor, format, opts).await?,
                    None if line.trim().is_empty() => {}
                    None => eprintln!("Unknown command '{}'. {}", line.trim(), INPUT_HELP),
                },
                Ok(None) => {
                    // stdin closed; keep watching
                    input = None;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    input = None;
                }
            },
        }
    };

    monitor.shutdown().await;
    result
}

async fn next_line(input: &mut Option<InputLines>) -> std::io::Result<Option<String>> {
    match input {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

fn print_event(event: &MonitorEvent, format: OutputFormat, opts: &FormatOptions) -> Result<()> {
    match format {
        OutputFormat::Json => write_output(&format!("{}\n", serde_json::to_string(event)?)),
        OutputFormat::Text => match format_event_text(event, opts) {
            Some(line) => write_output(&format!("{}\n", line)),
            None => Ok(()),
        },
    }
}

async fn run_input(
    command: InputCommand,
    monitor: &MonitorHandle,
    format: OutputFormat,
    opts: &FormatOptions,
) -> Result<()> {
    match command {
        InputCommand::Cancel => match monitor.cancel_emergency().await? {
            CancelOutcome::Cancelled => eprintln!("Emergency cancelled."),
            CancelOutcome::NothingToCancel => eprintln!("No countdown is running."),
            CancelOutcome::Rejected => eprintln!("{}", Error::EmergencyLocked),
        },
        InputCommand::Sos => {
            // The call can take several seconds with retries; keep printing
            // events meanwhile.
            let monitor = monitor.clone();
            let opts = *opts;
            tokio::spawn(async move {
                match monitor.send_manual_sos().await {
                    Ok(outcome) if format == OutputFormat::Text => {
                        let _ = write_output(&format_dispatch_text(&outcome, &opts));
                    }
                    Ok(_) => {}
                    Err(e) => eprintln!("SOS failed: {}", e),
                }
            });
        }
        InputCommand::Trigger => monitor.trigger_emergency_manually().await?,
        InputCommand::Status => match format {
            OutputFormat::Json => write_output(&format_json(&monitor.snapshot())?)?,
            OutputFormat::Text => write_output(&format_snapshot_text(&monitor.snapshot(), opts))?,
        },
        InputCommand::Help => eprintln!("{}", INPUT_HELP),
        InputCommand::Quit => {}
    }
    Ok(())
}
