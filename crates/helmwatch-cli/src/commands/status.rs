//! Status command implementation.

use anyhow::{Context, Result};
use helmwatch_core::PullChannel;
use helmwatch_types::{AlertRecord, StatusSnapshot};
use serde::Serialize;

use super::http_backend;
use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{FormatOptions, format_alerts_text, format_json, format_status_text};
use crate::util::write_output;

#[derive(Serialize)]
struct StatusOutput<'a> {
    status: Option<&'a StatusSnapshot>,
    alerts: &'a [AlertRecord],
}

/// Poll the backend once and print what it reports.
pub async fn cmd_status(config: &Config, format: OutputFormat, opts: &FormatOptions) -> Result<()> {
    let backend = http_backend(config)?;
    let snapshot = backend
        .poll()
        .await
        .with_context(|| format!("Failed to poll {}", backend.base_url()))?;

    let content = match format {
        OutputFormat::Json => format_json(&StatusOutput {
            status: snapshot.status.as_ref(),
            alerts: &snapshot.alerts,
        })?,
        OutputFormat::Text => {
            let mut out = match &snapshot.status {
                Some(status) => format_status_text(status, opts),
                None => "Status: not reported\n".to_string(),
            };
            out.push('\n');
            out.push_str(&format_alerts_text(&snapshot.alerts, opts));
            out
        }
    };

    write_output(&content)
}
