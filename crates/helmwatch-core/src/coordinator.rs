//! Ingestion coordinator.
//!
//! The [`Coordinator`] owns all mutable monitor state: the alert log, the
//! status projection, connection health and the [`EmergencyMachine`]. It is
//! synchronous; every input returns the [`Directive`]s its owner must carry
//! out (subscribe, start polling, start the countdown, dispatch SOS, ...).
//! [`crate::Monitor`] is that owner at runtime, and tests drive the
//! coordinator directly.
//!
//! # Connection health
//!
//! | From | Input | To | Directives |
//! |------|-------|----|------------|
//! | any (not live) | subscribe succeeded | `live-push` | `StopPolling` if polling |
//! | `disconnected` (start) | subscribe failed | `fallback-poll` | `StartPolling`, `ScheduleResubscribe` |
//! | `live-push` | channel lost | `fallback-poll` | `Unsubscribe`, `StartPolling`, `ScheduleResubscribe` |
//! | `fallback-poll` | poll failure streak reaches threshold | `disconnected` | none, polling continues |
//! | `disconnected` | poll succeeded | `fallback-poll` | none |
//!
//! Only one channel feeds the projection at a time: push deliveries are
//! ignored unless live, poll results are ignored unless polling, and the two
//! flags never hold together.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error, info, trace, warn};

use helmwatch_types::{AlertRecord, ConnectionHealth, DispatchReason, StatusSnapshot, merge};

use crate::dispatcher::DispatchOutcome;
use crate::emergency::{CancelOutcome, DEFAULT_COUNTDOWN_SECS, EmergencyAction, EmergencyMachine, Episode};
use crate::error::{Error, Result};
use crate::events::MonitorEvent;
use crate::pull::{PollOptions, PollResult};
use crate::push::PushMessage;
use crate::reconnect::ReconnectOptions;
use crate::retry::RetryConfig;

/// Configuration for the monitor and its coordinator.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Fallback poll loop options.
    pub poll: PollOptions,
    /// Consecutive poll failures before health becomes `disconnected`.
    pub poll_failure_threshold: u32,
    /// Countdown before automatic SOS, in seconds.
    pub countdown_secs: u32,
    /// Period of one countdown step.
    pub tick_interval: Duration,
    /// Push resubscribe schedule.
    pub resubscribe: ReconnectOptions,
    /// Retry policy for the SOS call.
    pub sos_retry: RetryConfig,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll: PollOptions::default(),
            poll_failure_threshold: 3,
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            tick_interval: Duration::from_secs(1),
            resubscribe: ReconnectOptions::default(),
            sos_retry: RetryConfig::for_sos(),
            event_capacity: 100,
        }
    }
}

impl MonitorConfig {
    /// Set the poll loop options.
    #[must_use]
    pub fn poll(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }

    /// Set the poll failure threshold.
    #[must_use]
    pub fn poll_failure_threshold(mut self, threshold: u32) -> Self {
        self.poll_failure_threshold = threshold;
        self
    }

    /// Set the countdown length in seconds.
    #[must_use]
    pub fn countdown_secs(mut self, secs: u32) -> Self {
        self.countdown_secs = secs;
        self
    }

    /// Set the resubscribe schedule.
    #[must_use]
    pub fn resubscribe(mut self, options: ReconnectOptions) -> Self {
        self.resubscribe = options;
        self
    }

    /// Set the SOS retry policy.
    #[must_use]
    pub fn sos_retry(mut self, retry: RetryConfig) -> Self {
        self.sos_retry = retry;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.poll.validate()?;
        self.resubscribe.validate()?;
        self.sos_retry.validate()?;
        if self.poll_failure_threshold == 0 {
            return Err(Error::invalid_config("poll_failure_threshold must be > 0"));
        }
        if self.countdown_secs == 0 {
            return Err(Error::invalid_config("countdown_secs must be > 0"));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::invalid_config("tick_interval must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        Ok(())
    }
}

/// A consistent view of the monitor state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    /// Alert log, newest-first.
    pub alerts: Vec<AlertRecord>,
    /// Latest device status.
    pub status: StatusSnapshot,
    /// Which channel is feeding the projection.
    pub health: ConnectionHealth,
    /// Current emergency episode.
    pub episode: Episode,
}

/// Work the coordinator asks its owner to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Start a push subscribe attempt.
    SubscribePush,
    /// Drop the current push subscription.
    Unsubscribe,
    /// Start the fallback poll loop.
    StartPolling,
    /// Stop the fallback poll loop.
    StopPolling,
    /// Call [`Coordinator::resubscribe_due`] after this delay.
    ScheduleResubscribe(Duration),
    /// Start the countdown ticker.
    StartCountdown,
    /// Stop the countdown ticker.
    StopCountdown,
    /// Make the SOS call and report back via [`Coordinator::on_dispatch_result`].
    Dispatch {
        /// Episode the call belongs to.
        episode: u64,
        /// Why the SOS is sent.
        reason: DispatchReason,
        /// Health at dispatch time.
        health: ConnectionHealth,
    },
}

/// The single owner of monitor state.
#[derive(Debug)]
pub struct Coordinator {
    config: MonitorConfig,
    alerts: Vec<AlertRecord>,
    status: StatusSnapshot,
    health: ConnectionHealth,
    polling: bool,
    subscribing: bool,
    poll_failures: u32,
    resubscribe_attempts: u32,
    emergency: EmergencyMachine,
    events: Vec<MonitorEvent>,
}

impl Coordinator {
    /// Create a coordinator in the initial state: no channel, `disconnected`.
    pub fn new(config: MonitorConfig) -> Self {
        let emergency = EmergencyMachine::new(config.countdown_secs);
        Self {
            config,
            alerts: Vec::new(),
            status: StatusSnapshot::default(),
            health: ConnectionHealth::Disconnected,
            polling: false,
            subscribing: false,
            poll_failures: 0,
            resubscribe_attempts: 0,
            emergency,
            events: Vec::new(),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Current connection health.
    pub fn health(&self) -> ConnectionHealth {
        self.health
    }

    /// Current alert log.
    pub fn alerts(&self) -> &[AlertRecord] {
        &self.alerts
    }

    /// Current status projection.
    pub fn status(&self) -> &StatusSnapshot {
        &self.status
    }

    /// Current emergency episode.
    pub fn episode(&self) -> &Episode {
        self.emergency.episode()
    }

    /// Whether the fallback poll loop should be running.
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Consecutive poll failures so far.
    pub fn poll_failures(&self) -> u32 {
        self.poll_failures
    }

    /// Whether a dispatch call is outstanding.
    pub fn is_dispatch_in_flight(&self) -> bool {
        self.emergency.is_dispatch_in_flight()
    }

    /// Copy out a consistent snapshot.
    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            alerts: self.alerts.clone(),
            status: self.status,
            health: self.health,
            episode: self.emergency.episode().clone(),
        }
    }

    /// Drain the events produced since the last call.
    pub fn take_events(&mut self) -> Vec<MonitorEvent> {
        std::mem::take(&mut self.events)
    }

    // ==================== Channel inputs ====================

    /// Begin monitoring: the first push subscribe attempt.
    pub fn start(&mut self) -> Vec<Directive> {
        info!("Starting monitor, subscribing to push channel");
        self.subscribing = true;
        vec![Directive::SubscribePush]
    }

    /// A push subscribe attempt succeeded.
    pub fn on_subscribed(&mut self) -> Vec<Directive> {
        self.subscribing = false;
        self.resubscribe_attempts = 0;

        let mut directives = Vec::new();
        if self.polling {
            self.polling = false;
            self.poll_failures = 0;
            directives.push(Directive::StopPolling);
        }
        self.set_health(ConnectionHealth::LivePush);
        directives
    }

    /// A push subscribe attempt failed.
    pub fn on_subscribe_failed(&mut self, error: &Error) -> Vec<Directive> {
        self.subscribing = false;
        warn!("Push subscribe failed: {}", error);

        let mut directives = self.ensure_polling();
        directives.extend(self.schedule_resubscribe());
        directives
    }

    /// The live subscription delivered a fatal signal or ended.
    pub fn on_channel_lost(&mut self, error: &Error) -> Vec<Directive> {
        if self.health != ConnectionHealth::LivePush {
            debug!("Ignoring channel loss while {}: {}", self.health, error);
            return Vec::new();
        }
        warn!("Push channel lost, falling back to polling: {}", error);

        self.resubscribe_attempts = 0;
        let mut directives = vec![Directive::Unsubscribe];
        directives.extend(self.ensure_polling());
        directives.extend(self.schedule_resubscribe());
        directives
    }

    /// The resubscribe delay elapsed.
    pub fn resubscribe_due(&mut self) -> Vec<Directive> {
        if self.health == ConnectionHealth::LivePush || self.subscribing {
            return Vec::new();
        }
        debug!(
            "Retrying push subscription (attempt {})",
            self.resubscribe_attempts
        );
        self.subscribing = true;
        vec![Directive::SubscribePush]
    }

    /// A delivery from the live subscription.
    pub fn on_push_message(&mut self, message: PushMessage, now: OffsetDateTime) -> Vec<Directive> {
        if self.health != ConnectionHealth::LivePush {
            debug!("Ignoring {} delivery while {}", message.topic(), self.health);
            return Vec::new();
        }
        match message {
            PushMessage::Alerts(records) => {
                self.merge_alerts(&records);
                Vec::new()
            }
            PushMessage::Status(status) => self.apply_status(status, now),
        }
    }

    /// One result from the poll loop.
    pub fn on_poll_result(&mut self, result: PollResult, now: OffsetDateTime) -> Vec<Directive> {
        if !self.polling {
            trace!("Ignoring poll result, not polling");
            return Vec::new();
        }

        match result {
            Ok(snapshot) => {
                if self.poll_failures > 0 {
                    info!("Poll recovered after {} failures", self.poll_failures);
                }
                self.poll_failures = 0;
                self.set_health(ConnectionHealth::FallbackPoll);
                self.merge_alerts(&snapshot.alerts);
                match snapshot.status {
                    Some(status) => self.apply_status(status, now),
                    None => Vec::new(),
                }
            }
            Err(e) => {
                self.poll_failures += 1;
                let threshold = self.config.poll_failure_threshold;
                if self.poll_failures < threshold {
                    warn!(
                        "Poll failed ({}/{}): {}",
                        self.poll_failures, threshold, e
                    );
                } else if self.health == ConnectionHealth::FallbackPoll {
                    error!(
                        "Poll failed {} times in a row, both channels are down: {}",
                        self.poll_failures, e
                    );
                    self.set_health(ConnectionHealth::Disconnected);
                } else {
                    debug!("Poll failed ({} in a row): {}", self.poll_failures, e);
                }
                Vec::new()
            }
        }
    }

    // ==================== Emergency inputs ====================

    /// One countdown tick.
    pub fn on_countdown_tick(&mut self) -> Vec<Directive> {
        self.with_emergency(|machine| ((), machine.tick())).1
    }

    /// Start a countdown as if an accident had been reported.
    pub fn trigger_emergency(&mut self, now: OffsetDateTime) -> Vec<Directive> {
        self.with_emergency(|machine| ((), machine.trigger(now))).1
    }

    /// Cancel a running countdown.
    pub fn cancel_emergency(&mut self) -> (CancelOutcome, Vec<Directive>) {
        self.with_emergency(EmergencyMachine::cancel)
    }

    /// Send an SOS now.
    pub fn manual_sos(&mut self, now: OffsetDateTime) -> Vec<Directive> {
        self.with_emergency(|machine| ((), machine.manual_sos(now))).1
    }

    /// The SOS call for `episode` finished.
    ///
    /// A local SOS record is restamped in place so that it is never older
    /// than the newest logged alert, which puts it at the head of the log.
    pub fn on_dispatch_result(
        &mut self,
        episode: u64,
        result: &mut Result<DispatchOutcome>,
    ) -> Vec<Directive> {
        match result {
            Ok(outcome) => {
                if let Some(record) = outcome.local_record.as_mut() {
                    if let Some(newest) = self.alerts.first() {
                        record.timestamp = record.timestamp.max(newest.timestamp);
                    }
                    self.merge_alerts(std::slice::from_ref(record));
                }
                self.events.push(MonitorEvent::DispatchSucceeded {
                    episode,
                    reason: outcome.request.reason,
                });
                self.with_emergency(|machine| ((), machine.dispatch_succeeded(episode)))
                    .1
            }
            Err(e) => {
                let reason = self
                    .emergency
                    .episode()
                    .reason
                    .unwrap_or(DispatchReason::Manual);
                let directives = self
                    .with_emergency(|machine| {
                        machine.dispatch_failed(episode);
                        ((), Vec::new())
                    })
                    .1;
                self.events.push(MonitorEvent::DispatchFailed {
                    episode,
                    reason,
                    error: e.to_string(),
                });
                directives
            }
        }
    }

    // ==================== Internals ====================

    fn ensure_polling(&mut self) -> Vec<Directive> {
        if self.polling {
            return Vec::new();
        }
        self.polling = true;
        self.poll_failures = 0;
        self.set_health(ConnectionHealth::FallbackPoll);
        vec![Directive::StartPolling]
    }

    fn schedule_resubscribe(&mut self) -> Vec<Directive> {
        if !self.config.resubscribe.allows_attempt(self.resubscribe_attempts) {
            warn!(
                "Giving up on push channel after {} attempts",
                self.resubscribe_attempts
            );
            return Vec::new();
        }
        let delay = self.config.resubscribe.delay_for_attempt(self.resubscribe_attempts);
        self.resubscribe_attempts += 1;
        debug!("Next push subscribe attempt in {:?}", delay);
        vec![Directive::ScheduleResubscribe(delay)]
    }

    fn set_health(&mut self, to: ConnectionHealth) {
        if self.health == to {
            return;
        }
        info!("Connection health: {} -> {}", self.health, to);
        self.events.push(MonitorEvent::HealthChanged {
            from: self.health,
            to,
        });
        self.health = to;
    }

    fn merge_alerts(&mut self, incoming: &[AlertRecord]) {
        if incoming.is_empty() {
            return;
        }
        let merged = merge(&self.alerts, incoming);
        if merged == self.alerts {
            return;
        }
        self.alerts = merged;
        self.events.push(MonitorEvent::AlertsUpdated {
            count: self.alerts.len(),
            newest: self.alerts.first().cloned(),
        });
    }

    fn apply_status(&mut self, status: StatusSnapshot, now: OffsetDateTime) -> Vec<Directive> {
        if status == self.status {
            trace!("Status unchanged, skipping");
            return Vec::new();
        }
        self.status = status;
        self.events.push(MonitorEvent::StatusUpdated { status });
        self.with_emergency(|machine| ((), machine.on_accident(status.accident, now)))
            .1
    }

    /// Run an emergency operation and translate its actions.
    fn with_emergency<R>(
        &mut self,
        op: impl FnOnce(&mut EmergencyMachine) -> (R, Vec<EmergencyAction>),
    ) -> (R, Vec<Directive>) {
        let before = self.emergency.episode().clone();
        let (result, actions) = op(&mut self.emergency);

        let mut directives = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                EmergencyAction::StartCountdown => directives.push(Directive::StartCountdown),
                EmergencyAction::StopCountdown => directives.push(Directive::StopCountdown),
                EmergencyAction::Dispatch { episode, reason } => {
                    directives.push(Directive::Dispatch {
                        episode,
                        reason,
                        health: self.health,
                    })
                }
                EmergencyAction::Resolved {
                    episode,
                    resolution,
                } => self.events.push(MonitorEvent::EpisodeResolved {
                    episode,
                    resolution,
                }),
            }
        }

        if *self.emergency.episode() != before {
            self.events.push(MonitorEvent::EpisodeChanged {
                episode: self.emergency.episode().clone(),
            });
        }
        (result, directives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{SosRequest, local_sos_record};
    use crate::pull::PollSnapshot;
    use helmwatch_types::{AlertKind, EpisodeState, Severity};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-03-01 12:00 UTC);

    fn record(id: &str, minute: u8) -> AlertRecord {
        AlertRecord::new(
            id,
            AlertKind::Helmet,
            "Helmet disconnected",
            Severity::Warning,
            NOW.replace_minute(minute).unwrap(),
        )
    }

    fn accident() -> StatusSnapshot {
        StatusSnapshot {
            accident: true,
            ..StatusSnapshot::default()
        }
    }

    fn live() -> Coordinator {
        let mut c = Coordinator::new(MonitorConfig::default());
        c.start();
        c.on_subscribed();
        c.take_events();
        c
    }

    fn fallback() -> Coordinator {
        let mut c = Coordinator::new(MonitorConfig::default());
        c.start();
        c.on_subscribe_failed(&Error::poll("unreachable"));
        c.take_events();
        c
    }

    #[test]
    fn test_config_validate() {
        assert!(MonitorConfig::default().validate().is_ok());
        assert!(MonitorConfig::default().countdown_secs(0).validate().is_err());
        assert!(
            MonitorConfig::default()
                .poll_failure_threshold(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_initial_state() {
        let mut c = Coordinator::new(MonitorConfig::default());
        assert_eq!(c.health(), ConnectionHealth::Disconnected);
        assert_eq!(c.start(), vec![Directive::SubscribePush]);
        assert_eq!(c.snapshot(), MonitorSnapshot::default());
    }

    #[test]
    fn test_subscribe_success_goes_live() {
        let mut c = Coordinator::new(MonitorConfig::default());
        c.start();
        assert!(c.on_subscribed().is_empty());
        assert_eq!(c.health(), ConnectionHealth::LivePush);
        assert!(!c.is_polling());
        assert_eq!(
            c.take_events(),
            vec![MonitorEvent::HealthChanged {
                from: ConnectionHealth::Disconnected,
                to: ConnectionHealth::LivePush
            }]
        );
    }

    #[test]
    fn test_subscribe_failure_falls_back_with_backoff() {
        let mut c = Coordinator::new(MonitorConfig::default());
        c.start();

        let directives = c.on_subscribe_failed(&Error::poll("refused"));
        assert_eq!(
            directives,
            vec![
                Directive::StartPolling,
                Directive::ScheduleResubscribe(Duration::from_secs(5))
            ]
        );
        assert_eq!(c.health(), ConnectionHealth::FallbackPoll);

        assert_eq!(c.resubscribe_due(), vec![Directive::SubscribePush]);
        // No overlapping attempts.
        assert!(c.resubscribe_due().is_empty());

        assert_eq!(
            c.on_subscribe_failed(&Error::poll("refused")),
            vec![Directive::ScheduleResubscribe(Duration::from_secs(10))]
        );
    }

    #[test]
    fn test_resubscribe_success_stops_polling() {
        let mut c = fallback();
        c.resubscribe_due();
        assert_eq!(c.on_subscribed(), vec![Directive::StopPolling]);
        assert_eq!(c.health(), ConnectionHealth::LivePush);
        assert!(!c.is_polling());
    }

    #[test]
    fn test_channel_lost_hands_over_to_polling() {
        let mut c = live();
        let directives = c.on_channel_lost(&Error::channel(
            crate::error::ChannelFailureReason::Closed,
        ));
        assert_eq!(
            directives,
            vec![
                Directive::Unsubscribe,
                Directive::StartPolling,
                Directive::ScheduleResubscribe(Duration::from_secs(5))
            ]
        );
        assert_eq!(c.health(), ConnectionHealth::FallbackPoll);
        assert!(c.is_polling());
    }

    #[test]
    fn test_poll_failure_streak_disconnects() {
        let mut c = fallback();

        c.on_poll_result(Err(Error::poll("timeout")), NOW);
        c.on_poll_result(Err(Error::poll("timeout")), NOW);
        assert_eq!(c.health(), ConnectionHealth::FallbackPoll);

        c.on_poll_result(Err(Error::poll("timeout")), NOW);
        assert_eq!(c.health(), ConnectionHealth::Disconnected);
        assert!(c.is_polling());

        c.on_poll_result(Err(Error::poll("timeout")), NOW);
        assert_eq!(c.health(), ConnectionHealth::Disconnected);

        c.on_poll_result(Ok(PollSnapshot::default()), NOW);
        assert_eq!(c.health(), ConnectionHealth::FallbackPoll);
        assert_eq!(c.poll_failures(), 0);
    }

    #[test]
    fn test_success_resets_streak() {
        let mut c = fallback();
        c.on_poll_result(Err(Error::poll("timeout")), NOW);
        c.on_poll_result(Err(Error::poll("timeout")), NOW);
        c.on_poll_result(Ok(PollSnapshot::default()), NOW);
        c.on_poll_result(Err(Error::poll("timeout")), NOW);
        c.on_poll_result(Err(Error::poll("timeout")), NOW);
        assert_eq!(c.health(), ConnectionHealth::FallbackPoll);
    }

    #[test]
    fn test_inactive_channel_is_ignored() {
        let mut c = fallback();
        c.on_push_message(PushMessage::Status(accident()), NOW);
        assert_eq!(c.status(), &StatusSnapshot::default());

        let mut c = live();
        c.on_poll_result(
            Ok(PollSnapshot {
                alerts: vec![record("a", 1)],
                status: Some(accident()),
            }),
            NOW,
        );
        assert!(c.alerts().is_empty());
        assert_eq!(c.episode().state, EpisodeState::Idle);
    }

    #[test]
    fn test_push_and_poll_produce_same_projection() {
        let alerts = vec![record("b", 2), record("a", 1)];
        let status = StatusSnapshot {
            fatigue: helmwatch_types::FatigueLevel::Tired,
            ..StatusSnapshot::default()
        };

        let mut pushed = live();
        pushed.on_push_message(PushMessage::Alerts(alerts.clone()), NOW);
        pushed.on_push_message(PushMessage::Status(status), NOW);

        let mut polled = fallback();
        polled.on_poll_result(
            Ok(PollSnapshot {
                alerts,
                status: Some(status),
            }),
            NOW,
        );

        assert_eq!(pushed.alerts(), polled.alerts());
        assert_eq!(pushed.status(), polled.status());
    }

    #[test]
    fn test_missing_status_keeps_projection() {
        let mut c = fallback();
        c.on_poll_result(
            Ok(PollSnapshot {
                alerts: Vec::new(),
                status: Some(accident()),
            }),
            NOW,
        );
        c.on_poll_result(Ok(PollSnapshot::default()), NOW);
        assert!(c.status().accident);
    }

    #[test]
    fn test_same_status_twice_is_idempotent() {
        let mut c = live();
        let first = c.on_push_message(PushMessage::Status(accident()), NOW);
        assert_eq!(first, vec![Directive::StartCountdown]);
        let events = c.take_events();

        let second = c.on_push_message(PushMessage::Status(accident()), NOW);
        assert!(second.is_empty());
        assert!(c.take_events().is_empty());
        assert_eq!(c.episode().id, 1);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, MonitorEvent::StatusUpdated { .. }))
        );

        // After a cancel the unchanged flag does not re-trigger.
        c.cancel_emergency();
        c.on_push_message(PushMessage::Status(accident()), NOW);
        assert_eq!(c.episode().state, EpisodeState::Idle);
    }

    #[test]
    fn test_countdown_to_dispatch_carries_health() {
        let mut c = fallback();
        c.trigger_emergency(NOW);

        let mut dispatched = Vec::new();
        for _ in 0..30 {
            dispatched.extend(
                c.on_countdown_tick()
                    .into_iter()
                    .filter(|d| matches!(d, Directive::Dispatch { .. })),
            );
        }
        assert_eq!(
            dispatched,
            vec![Directive::Dispatch {
                episode: 1,
                reason: DispatchReason::Auto,
                health: ConnectionHealth::FallbackPoll
            }]
        );
        assert_eq!(c.episode().state, EpisodeState::Dispatching);
    }

    #[test]
    fn test_dispatch_success_merges_local_record_first() {
        let mut c = fallback();
        c.on_poll_result(
            Ok(PollSnapshot {
                alerts: vec![record("a", 1)],
                status: None,
            }),
            NOW,
        );
        c.manual_sos(NOW);

        let sos_at = NOW.replace_minute(30).unwrap();
        let outcome = DispatchOutcome {
            request: SosRequest {
                timestamp: sos_at,
                reason: DispatchReason::Manual,
            },
            ack: serde_json::json!({"success": true}),
            local_record: Some(local_sos_record(DispatchReason::Manual, sos_at)),
        };
        c.on_dispatch_result(1, &mut Ok(outcome));

        assert_eq!(c.alerts()[0].kind, AlertKind::Sos);
        assert_eq!(c.alerts()[0].severity, Severity::Critical);
        assert_eq!(c.alerts().len(), 2);
        assert_eq!(c.episode().state, EpisodeState::Idle);

        let events = c.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            MonitorEvent::EpisodeResolved {
                episode: 1,
                resolution: crate::emergency::Resolution::Dispatched
            }
        )));
    }

    #[test]
    fn test_local_record_outranks_newer_backend_alert() {
        let mut c = fallback();
        c.manual_sos(NOW);

        // A backend alert newer than the acknowledgement lands while the
        // call is in flight.
        let newer = AlertRecord::new(
            "b1",
            AlertKind::Fatigue,
            "Driver fatigue detected",
            Severity::Warning,
            NOW + time::Duration::seconds(1),
        );
        c.on_poll_result(
            Ok(PollSnapshot {
                alerts: vec![newer],
                status: None,
            }),
            NOW,
        );

        let mut result = Ok(DispatchOutcome {
            request: SosRequest {
                timestamp: NOW,
                reason: DispatchReason::Manual,
            },
            ack: serde_json::json!({"success": true}),
            local_record: Some(local_sos_record(DispatchReason::Manual, NOW)),
        });
        c.on_dispatch_result(1, &mut result);

        assert_eq!(c.alerts()[0].kind, AlertKind::Sos);
        assert_eq!(c.alerts()[1].id, "b1");
        assert_eq!(c.alerts()[0].timestamp, NOW + time::Duration::seconds(1));

        // Callers see the record as it was logged.
        let logged = result.unwrap().local_record.unwrap();
        assert_eq!(logged, c.alerts()[0]);
    }

    #[test]
    fn test_malformed_poll_alerts_still_start_countdown() {
        let mut c = fallback();
        let body = serde_json::json!({"alerts": "oops", "status": {"accident": true}});
        let snapshot = PollSnapshot::from_response(&body).unwrap();

        let directives = c.on_poll_result(Ok(snapshot), NOW);
        assert!(directives.contains(&Directive::StartCountdown));
        assert_eq!(c.episode().state, EpisodeState::CountingDown);
        assert_eq!(c.poll_failures(), 0);
        assert!(c.alerts().is_empty());
    }

    #[test]
    fn test_dispatch_failure_stays_dispatching() {
        let mut c = live();
        c.manual_sos(NOW);
        c.take_events();

        c.on_dispatch_result(1, &mut Err(Error::dispatch("HTTP 503")));
        assert_eq!(c.episode().state, EpisodeState::Dispatching);
        assert!(c.episode().dispatch_failed);
        assert!(!c.is_dispatch_in_flight());

        let events = c.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            MonitorEvent::DispatchFailed {
                episode: 1,
                reason: DispatchReason::Manual,
                ..
            }
        )));

        assert_eq!(c.cancel_emergency().0, CancelOutcome::Rejected);
        assert_eq!(
            c.manual_sos(NOW),
            vec![Directive::Dispatch {
                episode: 1,
                reason: DispatchReason::Manual,
                health: ConnectionHealth::LivePush
            }]
        );
    }
}
