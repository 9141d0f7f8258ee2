//! Command-line monitor for smart helmet alerts.
//!
//! The `helmwatch` binary watches a helmet backend over a WebSocket push
//! channel with REST polling as fallback, counts down on a reported accident
//! and sends an SOS unless the rider cancels.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `watch` | Run the monitor; type `cancel` or `sos` while it runs |
//! | `status` | Poll once and print the status and alert log |
//! | `sos` | Send a manual SOS |
//! | `send-device-data` | Upload a telemetry report, as the helmet would |
//! | `config` | Show, validate or initialize the configuration |
//!
//! # Configuration
//!
//! Settings live in `<config dir>/helmwatch/config.toml`; `--config`,
//! `--base-url` and `--push-url` override them.
//!
//! # Library Usage
//!
//! The monitor itself lives in [`helmwatch_core`]; this crate re-exports it
//! and [`helmwatch_types`] for convenience.

pub use helmwatch_core;
pub use helmwatch_types;
