//! Command implementations for the CLI.

mod config;
mod device_data;
mod sos;
mod status;
mod watch;

pub use config::cmd_config;
pub use device_data::cmd_send_device_data;
pub use sos::cmd_sos;
pub use status::cmd_status;
pub use watch::{WatchArgs, cmd_watch};

use anyhow::{Context, Result};
use helmwatch_core::HttpBackend;

use crate::config::Config;

/// Build the HTTP client for the configured backend.
fn http_backend(config: &Config) -> Result<HttpBackend> {
    HttpBackend::with_timeout(&config.backend.base_url, config.request_timeout())
        .with_context(|| format!("Invalid backend URL: {}", config.backend.base_url))
}
