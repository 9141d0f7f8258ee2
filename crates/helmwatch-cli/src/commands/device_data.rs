//! Telemetry upload command implementation.

use anyhow::{Context, Result, anyhow};
use helmwatch_core::DeviceReport;
use helmwatch_types::Location;

use super::http_backend;
use crate::cli::{DeviceDataArgs, OutputFormat};
use crate::config::Config;
use crate::format::format_json;
use crate::util::write_output;

fn report_from_args(args: &DeviceDataArgs) -> Result<DeviceReport> {
    let location = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => Some(
            Location::new(lat, lon)
                .ok_or_else(|| anyhow!("Invalid coordinates: {}, {}", lat, lon))?,
        ),
        _ => None,
    };
    Ok(DeviceReport {
        helmet: args.helmet.into(),
        accident: args.accident,
        fatigue: args.fatigue.into(),
        location,
    })
}

/// Upload one telemetry report, as the helmet device would.
pub async fn cmd_send_device_data(
    config: &Config,
    args: &DeviceDataArgs,
    format: OutputFormat,
) -> Result<()> {
    let report = report_from_args(args)?;
    let backend = http_backend(config)?;
    let ack = backend
        .send_device_data(&report)
        .await
        .context("Failed to send device data")?;

    let content = match format {
        OutputFormat::Json => format_json(&ack)?,
        OutputFormat::Text => format!(
            "Device data sent (helmet {}, accident {}, fatigue {})\n",
            report.helmet,
            if report.accident { "yes" } else { "no" },
            report.fatigue
        ),
    };
    write_output(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{FatigueArg, HelmetArg};
    use helmwatch_types::{FatigueLevel, HelmetState};

    fn args(lat: Option<f64>, lon: Option<f64>) -> DeviceDataArgs {
        DeviceDataArgs {
            helmet: HelmetArg::Disconnected,
            accident: true,
            fatigue: FatigueArg::Critical,
            lat,
            lon,
        }
    }

    #[test]
    fn test_report_from_args() {
        let report = report_from_args(&args(Some(59.33), Some(18.07))).unwrap();
        assert_eq!(report.helmet, HelmetState::Disconnected);
        assert_eq!(report.fatigue, FatigueLevel::Critical);
        assert!(report.accident);
        assert!(report.location.is_some());

        assert!(report_from_args(&args(None, None)).unwrap().location.is_none());
    }

    #[test]
    fn test_out_of_range_coordinates() {
        assert!(report_from_args(&args(Some(95.0), Some(18.07))).is_err());
    }
}
