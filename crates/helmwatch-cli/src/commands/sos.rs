//! Manual SOS command implementation.

use std::sync::Arc;

use anyhow::{Context, Result};
use helmwatch_core::SosDispatcher;
use helmwatch_types::{ConnectionHealth, DispatchReason};
use serde_json::json;
use time::OffsetDateTime;

use super::http_backend;
use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{FormatOptions, format_dispatch_text, format_json};
use crate::util::{confirm, write_output};

/// Send a manual SOS outside the monitor.
///
/// No push channel is listening here, so the local SOS record is always
/// produced.
pub async fn cmd_sos(
    config: &Config,
    yes: bool,
    format: OutputFormat,
    opts: &FormatOptions,
) -> Result<()> {
    if !confirm("Send an SOS alert now?", yes)? {
        eprintln!("Cancelled.");
        return Ok(());
    }

    let backend = Arc::new(http_backend(config)?);
    let dispatcher = SosDispatcher::new(backend, config.sos_retry());
    let outcome = dispatcher
        .dispatch(
            DispatchReason::Manual,
            OffsetDateTime::now_utc(),
            ConnectionHealth::Disconnected,
        )
        .await
        .context("SOS was not delivered")?;

    let content = match format {
        OutputFormat::Json => format_json(&json!({
            "request": outcome.request,
            "ack": outcome.ack,
            "local_record": outcome.local_record,
        }))?,
        OutputFormat::Text => format_dispatch_text(&outcome, opts),
    };
    write_output(&content)
}
