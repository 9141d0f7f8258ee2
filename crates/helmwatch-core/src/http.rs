//! HTTP client for the helmet backend REST API.
//!
//! [`HttpBackend`] is both the pull channel (`GET /alerts`) and the SOS
//! endpoint (`POST /sos`). It also exposes the device telemetry upload
//! (`POST /device-data`) used by test tooling.
//!
//! # Example
//!
//! ```no_run
//! use helmwatch_core::{HttpBackend, PullChannel};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = HttpBackend::new("https://helmet.example.com/api")?;
//!
//! let snapshot = backend.poll().await?;
//! println!("{} alerts", snapshot.alerts.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use helmwatch_types::{FatigueLevel, HelmetState, Location};

use crate::dispatcher::{SosAck, SosRequest};
use crate::error::{Error, Result};
use crate::pull::PollSnapshot;
use crate::traits::{PullChannel, SosEndpoint};

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Telemetry as the helmet device posts it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceReport {
    /// Helmet connectivity.
    pub helmet: HelmetState,
    /// Accident flag.
    pub accident: bool,
    /// Rider fatigue level.
    pub fatigue: FatigueLevel,
    /// GPS fix, if any.
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Copy)]
enum Call {
    Poll,
    Sos,
    DeviceData,
}

impl Call {
    fn operation(self) -> &'static str {
        match self {
            Call::Poll => "poll",
            Call::Sos => "send_sos",
            Call::DeviceData => "send_device_data",
        }
    }

    fn failure(self, status: Option<u16>, message: String) -> Error {
        match self {
            Call::Poll => Error::Poll { status, message },
            Call::Sos | Call::DeviceData => Error::Dispatch { status, message },
        }
    }
}

/// HTTP client for the helmet backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBackend {
    /// Create a client with the default 10 second request timeout.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The API base URL (e.g., "https://helmet.example.com/api")
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Self::with_client(base_url, client, timeout)
    }

    /// Create a client with a custom reqwest Client.
    ///
    /// `timeout` is only used to label timeout errors; the client's own
    /// timeout applies.
    pub fn with_client(base_url: &str, client: Client, timeout: Duration) -> Result<Self> {
        // Normalize URL (remove trailing slash)
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::invalid_config(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload one telemetry report, as the helmet device would.
    pub async fn send_device_data(&self, report: &DeviceReport) -> Result<Value> {
        let url = format!("{}/device-data", self.base_url);
        self.post_json(&url, report, Call::DeviceData).await
    }

    // ======================================================================
    // Internal HTTP helpers
    // ======================================================================

    async fn get(&self, url: &str, call: Call) -> Result<Value> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport(e, call))?;

        self.handle_response(response, call).await
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        call: Call,
    ) -> Result<Value> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport(e, call))?;

        self.handle_response(response, call).await
    }

    fn transport(&self, error: reqwest::Error, call: Call) -> Error {
        if error.is_timeout() {
            Error::timeout(call.operation(), self.timeout)
        } else {
            Error::Http(error)
        }
    }

    async fn handle_response(&self, response: Response, call: Call) -> Result<Value> {
        let status = response.status();
        if status.is_success() {
            let body = response.text().await.map_err(|e| self.transport(e, call))?;
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_str(&body)?)
        } else {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| status.to_string());

            Err(call.failure(Some(status.as_u16()), message))
        }
    }
}

#[async_trait]
impl PullChannel for HttpBackend {
    async fn poll(&self) -> Result<PollSnapshot> {
        let url = format!("{}/alerts", self.base_url);
        let body = self.get(&url, Call::Poll).await?;
        Ok(PollSnapshot::from_response(&body)?)
    }
}

#[async_trait]
impl SosEndpoint for HttpBackend {
    async fn send_sos(&self, request: &SosRequest) -> Result<SosAck> {
        let url = format!("{}/sos", self.base_url);
        self.post_json(&url, request, Call::Sos).await
    }
}
