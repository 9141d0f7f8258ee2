//! Core types for helmet alerts and device status.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Category of an alert record.
///
/// Detection (accident, fatigue) happens upstream; this is only the label the
/// backend attached to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AlertKind {
    /// An accident was detected.
    Accident,
    /// Helmet connectivity changed.
    Helmet,
    /// Rider fatigue was detected.
    Fatigue,
    /// An SOS was dispatched.
    Sos,
    /// Anything else the backend reports.
    Other,
}

impl AlertKind {
    /// Interpret a wire label. Unknown labels map to [`AlertKind::Other`].
    ///
    /// ```
    /// use helmwatch_types::AlertKind;
    ///
    /// assert_eq!(AlertKind::from_wire("accident"), AlertKind::Accident);
    /// assert_eq!(AlertKind::from_wire("SOS"), AlertKind::Sos);
    /// assert_eq!(AlertKind::from_wire("battery"), AlertKind::Other);
    /// ```
    #[must_use]
    pub fn from_wire(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "accident" => AlertKind::Accident,
            "helmet" => AlertKind::Helmet,
            "fatigue" => AlertKind::Fatigue,
            "sos" => AlertKind::Sos,
            _ => AlertKind::Other,
        }
    }

    /// The lowercase wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Accident => "accident",
            AlertKind::Helmet => "helmet",
            AlertKind::Fatigue => "fatigue",
            AlertKind::Sos => "sos",
            AlertKind::Other => "other",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to an alert record.
///
/// # Ordering
///
/// Severities are ordered by urgency: `Normal < Info < Warning < Critical`,
/// so `severity >= Severity::Warning` selects everything that needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Severity {
    /// Informational, nothing wrong.
    Normal,
    /// Informational notice.
    Info,
    /// Needs attention.
    Warning,
    /// Needs immediate attention.
    Critical,
}

impl Severity {
    /// Interpret a wire label. Unknown labels map to [`Severity::Normal`],
    /// the same fallback the dashboard uses for styling.
    #[must_use]
    pub fn from_wire(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "warning" => Severity::Warning,
            "info" => Severity::Info,
            _ => Severity::Normal,
        }
    }

    /// The lowercase wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Normal => "normal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the alert log.
///
/// Records are immutable once created. The `timestamp` is the source of truth
/// for ordering; see [`crate::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlertRecord {
    /// Identifier, unique within the alert log.
    pub id: String,
    /// Alert category.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: AlertKind,
    /// Human-readable message.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// When the alert was raised.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl AlertRecord {
    /// Create a new alert record.
    pub fn new(
        id: impl Into<String>,
        kind: AlertKind,
        message: impl Into<String>,
        severity: Severity,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            message: message.into(),
            severity,
            timestamp,
        }
    }
}

impl fmt::Display for AlertRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.severity, self.timestamp, self.kind, self.message
        )
    }
}

/// Helmet connectivity as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum HelmetState {
    /// The helmet is paired and reporting.
    #[default]
    Connected,
    /// The helmet link is lost.
    Disconnected,
}

impl HelmetState {
    /// Dashboard description of this state.
    pub fn description(&self) -> &'static str {
        match self {
            HelmetState::Connected => "Helmet is properly connected and functioning",
            HelmetState::Disconnected => "Helmet connection lost - check device",
        }
    }
}

impl FromStr for HelmetState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connected" => Ok(HelmetState::Connected),
            "disconnected" => Ok(HelmetState::Disconnected),
            _ => Err(ParseError::invalid("helmet", s)),
        }
    }
}

impl fmt::Display for HelmetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HelmetState::Connected => f.write_str("connected"),
            HelmetState::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Rider fatigue level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FatigueLevel {
    /// Alert and rested.
    #[default]
    Normal,
    /// Showing signs of fatigue.
    Tired,
    /// Critically fatigued.
    Critical,
}

impl FatigueLevel {
    /// Dashboard description of this level.
    pub fn description(&self) -> &'static str {
        match self {
            FatigueLevel::Normal => "Rider alertness levels are normal",
            FatigueLevel::Tired => "Rider showing signs of fatigue - recommend rest",
            FatigueLevel::Critical => "Critical fatigue detected - immediate rest required",
        }
    }
}

impl FromStr for FatigueLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(FatigueLevel::Normal),
            "tired" => Ok(FatigueLevel::Tired),
            "critical" => Ok(FatigueLevel::Critical),
            _ => Err(ParseError::invalid("fatigue", s)),
        }
    }
}

impl fmt::Display for FatigueLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatigueLevel::Normal => f.write_str("normal"),
            FatigueLevel::Tired => f.write_str("tired"),
            FatigueLevel::Critical => f.write_str("critical"),
        }
    }
}

/// A GPS fix.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Location {
    /// Latitude in degrees, -90..=90.
    #[cfg_attr(feature = "serde", serde(rename = "lat"))]
    pub latitude: f64,
    /// Longitude in degrees, -180..=180.
    #[cfg_attr(feature = "serde", serde(rename = "lng"))]
    pub longitude: f64,
}

impl Location {
    /// Create a location, returning `None` when the coordinates are out of range
    /// or not finite.
    ///
    /// ```
    /// use helmwatch_types::Location;
    ///
    /// assert!(Location::new(59.33, 18.07).is_some());
    /// assert!(Location::new(91.0, 0.0).is_none());
    /// ```
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.latitude, self.longitude)
    }
}

/// Latest device-status snapshot.
///
/// Always replaced as a whole, never merged field by field: upstream holds a
/// single status object, not a stream of deltas.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct StatusSnapshot {
    /// Helmet connectivity.
    pub helmet: HelmetState,
    /// Whether an accident is currently flagged.
    pub accident: bool,
    /// Rider fatigue level.
    pub fatigue: FatigueLevel,
    /// Last GPS fix, absent without a fix.
    pub location: Option<Location>,
    /// When the device last reported.
    #[cfg_attr(feature = "serde", serde(default, with = "time::serde::rfc3339::option"))]
    pub last_update: Option<OffsetDateTime>,
}

impl StatusSnapshot {
    /// Dashboard description of the accident flag.
    pub fn accident_description(&self) -> &'static str {
        if self.accident {
            "ACCIDENT DETECTED - Emergency protocols activated"
        } else {
            "No accidents detected - rider is safe"
        }
    }

    /// Dashboard description of the location fix.
    pub fn location_description(&self) -> &'static str {
        if self.location.is_some() {
            "GPS location is being tracked"
        } else {
            "GPS location unavailable"
        }
    }
}

/// Which channel, if any, is currently feeding the status projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ConnectionHealth {
    /// The real-time push subscription is live.
    LivePush,
    /// Push is unavailable; the pull channel is polling.
    FallbackPoll,
    /// Neither channel is delivering.
    #[default]
    Disconnected,
}

impl fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionHealth::LivePush => f.write_str("live-push"),
            ConnectionHealth::FallbackPoll => f.write_str("fallback-poll"),
            ConnectionHealth::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Phase of an emergency episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum EpisodeState {
    /// No active episode.
    #[default]
    Idle,
    /// Counting down towards automatic SOS.
    CountingDown,
    /// SOS dispatch started; irreversible.
    Dispatching,
    /// Episode finished (cancelled or dispatched).
    Resolved,
}

impl fmt::Display for EpisodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeState::Idle => f.write_str("idle"),
            EpisodeState::CountingDown => f.write_str("counting-down"),
            EpisodeState::Dispatching => f.write_str("dispatching"),
            EpisodeState::Resolved => f.write_str("resolved"),
        }
    }
}

/// Why an SOS was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DispatchReason {
    /// The user pressed SOS.
    Manual,
    /// The countdown expired.
    Auto,
}

impl DispatchReason {
    /// The lowercase wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchReason::Manual => "manual",
            DispatchReason::Auto => "auto",
        }
    }
}

impl fmt::Display for DispatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
