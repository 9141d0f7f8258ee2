//! SOS dispatch.
//!
//! [`SosDispatcher`] makes the SOS call with a bounded retry and, when the
//! push channel is not live, synthesizes the local alert record that the
//! channel would otherwise echo back.
//!
//! Calling it at most once per episode is the emergency machine's job, not
//! the dispatcher's.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{error, info};
use uuid::Uuid;

use helmwatch_types::{AlertKind, AlertRecord, ConnectionHealth, DispatchReason, Severity};

use crate::error::Result;
use crate::retry::{RetryConfig, with_retry};
use crate::traits::SosEndpoint;

/// Body of the SOS call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SosRequest {
    /// When the SOS was raised.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Why it was raised.
    #[serde(rename = "type")]
    pub reason: DispatchReason,
}

/// The backend's acknowledgment. Its shape is not interpreted.
pub type SosAck = Value;

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// The request that was acknowledged.
    pub request: SosRequest,
    /// The backend's acknowledgment body.
    pub ack: SosAck,
    /// Locally synthesized record, present when the push channel was not
    /// live and so will not echo the SOS back.
    pub local_record: Option<AlertRecord>,
}

/// Makes SOS calls.
#[derive(Clone)]
pub struct SosDispatcher {
    endpoint: Arc<dyn SosEndpoint>,
    retry: RetryConfig,
}

impl std::fmt::Debug for SosDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SosDispatcher")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SosDispatcher {
    /// Create a dispatcher.
    pub fn new(endpoint: Arc<dyn SosEndpoint>, retry: RetryConfig) -> Self {
        Self { endpoint, retry }
    }

    /// Send an SOS.
    ///
    /// `health` is the connection health at dispatch time; anything other
    /// than [`ConnectionHealth::LivePush`] gets a local record. The record is
    /// stamped when the backend acknowledges, never earlier than `timestamp`.
    ///
    /// Failures are returned as [`Error::Dispatch`](crate::Error::Dispatch)
    /// (or `Timeout`) after the retries are exhausted.
    pub async fn dispatch(
        &self,
        reason: DispatchReason,
        timestamp: OffsetDateTime,
        health: ConnectionHealth,
    ) -> Result<DispatchOutcome> {
        let request = SosRequest { timestamp, reason };
        let endpoint = &self.endpoint;
        let request_ref = &request;

        let ack = with_retry(&self.retry, "send_sos", move || {
            endpoint.send_sos(request_ref)
        })
        .await
        .map_err(|e| {
            let e = e.into_dispatch();
            error!("{} SOS failed: {}", reason, e);
            e
        })?;

        info!("{} SOS acknowledged (health: {})", reason, health);
        let local_record = (health != ConnectionHealth::LivePush).then(|| {
            let acknowledged_at = OffsetDateTime::now_utc().max(timestamp);
            local_sos_record(reason, acknowledged_at)
        });

        Ok(DispatchOutcome {
            request,
            ack,
            local_record,
        })
    }
}

/// Build the record shown for an SOS the push channel will not echo.
pub fn local_sos_record(reason: DispatchReason, timestamp: OffsetDateTime) -> AlertRecord {
    AlertRecord::new(
        format!("local-sos-{}", Uuid::new_v4()),
        AlertKind::Sos,
        format!("SOS alert triggered ({})", reason),
        Severity::Critical,
        timestamp,
    )
}
