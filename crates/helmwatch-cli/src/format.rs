//! Output formatting for text and JSON output.

use std::fmt::Write as _;

use anyhow::Result;
use helmwatch_core::{DispatchOutcome, Episode, MonitorEvent, MonitorSnapshot, Resolution};
use helmwatch_types::{
    AlertRecord, ConnectionHealth, EpisodeState, FatigueLevel, HelmetState, Severity,
    StatusSnapshot,
};
use owo_colors::OwoColorize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self { no_color }
    }

    /// Paint `text` red (bold) when colors are enabled.
    fn danger(&self, text: &str) -> String {
        if self.no_color {
            text.to_string()
        } else {
            text.red().bold().to_string()
        }
    }

    fn warn(&self, text: &str) -> String {
        if self.no_color {
            text.to_string()
        } else {
            text.yellow().to_string()
        }
    }

    fn ok(&self, text: &str) -> String {
        if self.no_color {
            text.to_string()
        } else {
            text.green().to_string()
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.no_color {
            text.to_string()
        } else {
            text.dimmed().to_string()
        }
    }

    fn heading(&self, text: &str) -> String {
        if self.no_color {
            text.to_string()
        } else {
            text.bold().to_string()
        }
    }
}

/// Serialize a value as pretty-printed JSON with a trailing newline.
pub fn format_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)? + "\n")
}

/// RFC 3339 timestamp, falling back to the default rendering.
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

fn severity_label(severity: Severity, opts: &FormatOptions) -> String {
    let label = format!("{:<8}", severity.as_str().to_uppercase());
    match severity {
        Severity::Critical => opts.danger(&label),
        Severity::Warning => opts.warn(&label),
        Severity::Info => label,
        Severity::Normal => opts.dim(&label),
    }
}

/// One alert log line.
pub fn format_alert_line(record: &AlertRecord, opts: &FormatOptions) -> String {
    format!(
        "{} {} {:<8} {}",
        opts.dim(&format_timestamp(record.timestamp)),
        severity_label(record.severity, opts),
        record.kind.as_str(),
        record.message
    )
}

/// The alert log, newest first.
pub fn format_alerts_text(records: &[AlertRecord], opts: &FormatOptions) -> String {
    let mut out = format!("{} ({})\n", opts.heading("Alerts"), records.len());
    if records.is_empty() {
        out.push_str("  No alerts\n");
    }
    for record in records {
        let _ = writeln!(out, "  {}", format_alert_line(record, opts));
    }
    out
}

/// Status block with the dashboard descriptions.
pub fn format_status_text(status: &StatusSnapshot, opts: &FormatOptions) -> String {
    let helmet = match status.helmet {
        HelmetState::Connected => opts.ok("connected"),
        HelmetState::Disconnected => opts.danger("disconnected"),
    };
    let accident = if status.accident {
        opts.danger("YES")
    } else {
        opts.ok("no")
    };
    let fatigue = match status.fatigue {
        FatigueLevel::Normal => opts.ok("normal"),
        FatigueLevel::Tired => opts.warn("tired"),
        FatigueLevel::Critical => opts.danger("critical"),
    };
    let location = match &status.location {
        Some(location) => location.to_string(),
        None => opts.dim("unknown"),
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", opts.heading("Status"));
    let _ = writeln!(
        out,
        "  Helmet:   {}  {}",
        helmet,
        opts.dim(status.helmet.description())
    );
    let _ = writeln!(
        out,
        "  Accident: {}  {}",
        accident,
        opts.dim(status.accident_description())
    );
    let _ = writeln!(
        out,
        "  Fatigue:  {}  {}",
        fatigue,
        opts.dim(status.fatigue.description())
    );
    let _ = writeln!(
        out,
        "  Location: {}  {}",
        location,
        opts.dim(status.location_description())
    );
    if let Some(ts) = status.last_update {
        let _ = writeln!(out, "  Updated:  {}", format_timestamp(ts));
    }
    out
}

fn format_health(health: ConnectionHealth, opts: &FormatOptions) -> String {
    let label = health.to_string();
    match health {
        ConnectionHealth::LivePush => opts.ok(&label),
        ConnectionHealth::FallbackPoll => opts.warn(&label),
        ConnectionHealth::Disconnected => opts.danger(&label),
    }
}

/// One-line description of an episode.
pub fn format_episode(episode: &Episode, opts: &FormatOptions) -> String {
    match episode.state {
        EpisodeState::Idle => opts.dim("no emergency"),
        EpisodeState::CountingDown => opts.danger(&format!(
            "EMERGENCY #{}: SOS in {}s (type 'cancel' to stop)",
            episode.id, episode.countdown_remaining
        )),
        EpisodeState::Dispatching if episode.dispatch_failed => opts.danger(&format!(
            "EMERGENCY #{}: SOS failed (type 'sos' to retry)",
            episode.id
        )),
        EpisodeState::Dispatching if episode.redispatches > 0 => opts.danger(&format!(
            "EMERGENCY #{}: sending SOS (retry {})...",
            episode.id, episode.redispatches
        )),
        EpisodeState::Dispatching => {
            opts.danger(&format!("EMERGENCY #{}: sending SOS...", episode.id))
        }
        EpisodeState::Resolved => format!("emergency #{} resolved", episode.id),
    }
}

/// Full snapshot: connection, episode, status and alert log.
pub fn format_snapshot_text(snapshot: &MonitorSnapshot, opts: &FormatOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {}",
        opts.heading("Connection:"),
        format_health(snapshot.health, opts)
    );
    let _ = writeln!(
        out,
        "{} {}",
        opts.heading("Emergency:"),
        format_episode(&snapshot.episode, opts)
    );
    out.push('\n');
    out.push_str(&format_status_text(&snapshot.status, opts));
    out.push('\n');
    out.push_str(&format_alerts_text(&snapshot.alerts, opts));
    out
}

/// One line for a monitor event, or `None` for events not worth printing.
pub fn format_event_text(event: &MonitorEvent, opts: &FormatOptions) -> Option<String> {
    let line = match event {
        MonitorEvent::HealthChanged { from, to } => format!(
            "connection: {} -> {}",
            from,
            format_health(*to, opts)
        ),
        MonitorEvent::StatusUpdated { status } => format!(
            "status: helmet {}, accident {}, fatigue {}",
            status.helmet,
            if status.accident { "yes" } else { "no" },
            status.fatigue
        ),
        MonitorEvent::AlertsUpdated {
            newest: Some(record),
            ..
        } => format!("alert: {}", format_alert_line(record, opts)),
        MonitorEvent::AlertsUpdated { newest: None, .. } => return None,
        MonitorEvent::EpisodeChanged { episode } => {
            // Every tenth second of the countdown, then the last five.
            if episode.state == EpisodeState::CountingDown
                && episode.countdown_remaining % 10 != 0
                && episode.countdown_remaining > 5
            {
                return None;
            }
            format_episode(episode, opts)
        }
        MonitorEvent::EpisodeResolved {
            episode,
            resolution,
        } => match resolution {
            Resolution::Cancelled => opts.ok(&format!("emergency #{} cancelled", episode)),
            Resolution::Dispatched => {
                opts.ok(&format!("emergency #{}: SOS delivered", episode))
            }
        },
        MonitorEvent::DispatchSucceeded { episode, reason } => {
            format!("emergency #{}: {} SOS acknowledged", episode, reason.as_str())
        }
        MonitorEvent::DispatchFailed {
            episode,
            reason,
            error,
        } => opts.danger(&format!(
            "emergency #{}: {} SOS failed: {}",
            episode,
            reason.as_str(),
            error
        )),
        _ => return None,
    };
    Some(line)
}

/// Result of a manual SOS.
pub fn format_dispatch_text(outcome: &DispatchOutcome, opts: &FormatOptions) -> String {
    let mut out = opts.ok(&format!(
        "SOS sent at {}",
        format_timestamp(outcome.request.timestamp)
    ));
    out.push('\n');
    if let Some(record) = &outcome.local_record {
        let _ = writeln!(out, "  recorded locally: {}", format_alert_line(record, opts));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmwatch_types::{AlertKind, DispatchReason, Location};
    use time::macros::datetime;

    const PLAIN: FormatOptions = FormatOptions { no_color: true };

    fn record() -> AlertRecord {
        AlertRecord::new(
            "k1",
            AlertKind::Accident,
            "Crash detected",
            Severity::Critical,
            datetime!(2025-03-01 12:00:00 UTC),
        )
    }

    #[test]
    fn test_alert_line() {
        let line = format_alert_line(&record(), &PLAIN);
        assert_eq!(
            line,
            "2025-03-01T12:00:00Z CRITICAL accident Crash detected"
        );
    }

    #[test]
    fn test_alerts_text_empty() {
        let text = format_alerts_text(&[], &PLAIN);
        assert!(text.contains("Alerts (0)"));
        assert!(text.contains("No alerts"));
    }

    #[test]
    fn test_status_text_uses_descriptions() {
        let status = StatusSnapshot {
            helmet: HelmetState::Disconnected,
            accident: true,
            fatigue: FatigueLevel::Tired,
            location: Location::new(59.33, 18.07),
            last_update: None,
        };
        let text = format_status_text(&status, &PLAIN);
        assert!(text.contains("Helmet connection lost - check device"));
        assert!(text.contains("ACCIDENT DETECTED"));
        assert!(text.contains("recommend rest"));
        assert!(text.contains("GPS location is being tracked"));
    }

    #[test]
    fn test_episode_lines() {
        let counting = Episode {
            id: 2,
            state: EpisodeState::CountingDown,
            countdown_remaining: 17,
            started_at: None,
            reason: None,
            dispatch_failed: false,
            redispatches: 0,
        };
        assert_eq!(
            format_episode(&counting, &PLAIN),
            "EMERGENCY #2: SOS in 17s (type 'cancel' to stop)"
        );

        let failed = Episode {
            state: EpisodeState::Dispatching,
            reason: Some(DispatchReason::Auto),
            dispatch_failed: true,
            ..counting
        };
        assert!(format_episode(&failed, &PLAIN).contains("type 'sos' to retry"));

        let retrying = Episode {
            dispatch_failed: false,
            redispatches: 1,
            ..failed
        };
        assert_eq!(
            format_episode(&retrying, &PLAIN),
            "EMERGENCY #2: sending SOS (retry 1)..."
        );
        assert_eq!(format_episode(&Episode::default(), &PLAIN), "no emergency");
    }

    #[test]
    fn test_countdown_events_are_thinned() {
        let at = |remaining| MonitorEvent::EpisodeChanged {
            episode: Episode {
                id: 1,
                state: EpisodeState::CountingDown,
                countdown_remaining: remaining,
                ..Episode::default()
            },
        };
        assert!(format_event_text(&at(30), &PLAIN).is_some());
        assert!(format_event_text(&at(27), &PLAIN).is_none());
        assert!(format_event_text(&at(3), &PLAIN).is_some());
    }

    #[test]
    fn test_event_lines() {
        let event = MonitorEvent::HealthChanged {
            from: ConnectionHealth::LivePush,
            to: ConnectionHealth::FallbackPoll,
        };
        assert_eq!(
            format_event_text(&event, &PLAIN).as_deref(),
            Some("connection: live-push -> fallback-poll")
        );

        let event = MonitorEvent::EpisodeResolved {
            episode: 4,
            resolution: Resolution::Cancelled,
        };
        assert_eq!(
            format_event_text(&event, &PLAIN).as_deref(),
            Some("emergency #4 cancelled")
        );
    }

    #[test]
    fn test_json_snapshot() {
        let snapshot = MonitorSnapshot {
            alerts: vec![record()],
            ..MonitorSnapshot::default()
        };
        let json = format_json(&snapshot).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["alerts"][0]["type"], "accident");
        assert_eq!(value["health"], "disconnected");
    }
}
