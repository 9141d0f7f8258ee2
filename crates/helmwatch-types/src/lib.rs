//! Alert and device-status types for the helmwatch rider-safety monitor.
//!
//! This crate holds everything that does not need a runtime: the typed
//! alert and status model, the bounded alert log, and normalization of the
//! raw JSON both backend channels deliver.
//!
//! # Features
//!
//! - [`AlertRecord`] and [`StatusSnapshot`] data types
//! - [`merge`] for the newest-first, capacity-bounded alert log
//! - [`wire`] normalization for push and pull payloads
//! - Error types for data parsing
//!
//! # Example
//!
//! ```
//! use helmwatch_types::{merge, normalize_alert_map, AlertKind};
//! use serde_json::json;
//!
//! let batch = normalize_alert_map(&json!({
//!     "a1": {"type": "accident", "message": "Accident detected",
//!            "severity": "critical", "timestamp": "2025-03-01T12:00:00Z"}
//! }))
//! .unwrap();
//!
//! let log = merge(&[], &batch.records);
//! assert_eq!(log[0].kind, AlertKind::Accident);
//! ```

pub mod error;
pub mod log;
pub mod types;
pub mod wire;

pub use error::{ParseError, ParseResult};
pub use log::{ALERT_LOG_CAPACITY, is_well_formed, merge};
pub use types::{
    AlertKind, AlertRecord, ConnectionHealth, DispatchReason, EpisodeState, FatigueLevel,
    HelmetState, Location, Severity, StatusSnapshot,
};
pub use wire::{
    AlertBatch, normalize_alert_list, normalize_alert_map, parse_alert, parse_status,
    parse_timestamp,
};
