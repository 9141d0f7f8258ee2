//! Emergency escalation state machine.
//!
//! ```text
//!            accident / trigger          tick to 0 / manual SOS
//!   idle ───────────────────► counting-down ───────────────────► dispatching
//!    ▲  │                          │                                  │
//!    │  │ manual SOS               │ cancel                           │ ack
//!    │  └──────────────────────────┼──────────────────► dispatching   │
//!    │                             ▼                                  ▼
//!    └──────────────────────── resolved ◄─────────────────────────────┘
//! ```
//!
//! The machine is synchronous and owns no timers. It tells its owner what to
//! do through [`EmergencyAction`]s; the owner runs the one-second countdown
//! ticker and the SOS call and feeds the results back in.
//!
//! `dispatching` is a one-way gate: cancel is rejected, and a dispatch
//! failure keeps the episode there (flagged with `dispatch_failed`) until a
//! manual SOS succeeds. At most one dispatch call is in flight at a time.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use helmwatch_types::{DispatchReason, EpisodeState};

/// Default countdown before automatic SOS, in seconds.
pub const DEFAULT_COUNTDOWN_SECS: u32 = 30;

/// The current emergency episode.
///
/// While idle, `id` is 0 and the other fields are cleared.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Episode {
    /// Episode number, starting at 1. 0 while idle.
    pub id: u64,
    /// Current phase.
    pub state: EpisodeState,
    /// Seconds left before automatic SOS; only meaningful while counting down.
    pub countdown_remaining: u32,
    /// When the episode started.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Why the episode's first SOS was sent. Retries keep it.
    pub reason: Option<DispatchReason>,
    /// The last dispatch attempt failed; a manual SOS will retry it.
    pub dispatch_failed: bool,
    /// Manual retries after a failed dispatch.
    #[serde(default)]
    pub redispatches: u32,
}

impl Episode {
    /// Whether an episode is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            EpisodeState::CountingDown | EpisodeState::Dispatching
        )
    }
}

/// How an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The countdown was cancelled.
    Cancelled,
    /// The SOS was acknowledged.
    Dispatched,
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The countdown was stopped; no SOS will be sent.
    Cancelled,
    /// No episode was counting down.
    NothingToCancel,
    /// The SOS dispatch has already started.
    Rejected,
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyAction {
    /// Start the one-second countdown ticker.
    StartCountdown,
    /// Stop the countdown ticker. No tick may be applied after this.
    StopCountdown,
    /// Make the SOS call for this episode.
    Dispatch {
        /// Episode the call belongs to.
        episode: u64,
        /// Why the SOS is sent.
        reason: DispatchReason,
    },
    /// The episode finished and the machine is idle again.
    Resolved {
        /// The finished episode.
        episode: u64,
        /// How it ended.
        resolution: Resolution,
    },
}

/// The emergency state machine.
#[derive(Debug, Clone)]
pub struct EmergencyMachine {
    countdown_secs: u32,
    episode: Episode,
    next_id: u64,
    in_flight: bool,
}

impl Default for EmergencyMachine {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTDOWN_SECS)
    }
}

impl EmergencyMachine {
    /// Create an idle machine with the given countdown length.
    pub fn new(countdown_secs: u32) -> Self {
        Self {
            countdown_secs: countdown_secs.max(1),
            episode: Episode::default(),
            next_id: 1,
            in_flight: false,
        }
    }

    /// The current episode.
    pub fn episode(&self) -> &Episode {
        &self.episode
    }

    /// Whether a dispatch call is outstanding.
    pub fn is_dispatch_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Feed the accident flag of an accepted status update.
    pub fn on_accident(&mut self, accident: bool, now: OffsetDateTime) -> Vec<EmergencyAction> {
        if accident {
            self.trigger(now)
        } else {
            Vec::new()
        }
    }

    /// Start a countdown if idle. A no-op while an episode is active.
    pub fn trigger(&mut self, now: OffsetDateTime) -> Vec<EmergencyAction> {
        match self.episode.state {
            EpisodeState::Idle | EpisodeState::Resolved => {
                self.begin(now);
                self.episode.state = EpisodeState::CountingDown;
                self.episode.countdown_remaining = self.countdown_secs;
                info!(
                    "Emergency episode {} started, SOS in {}s unless cancelled",
                    self.episode.id, self.countdown_secs
                );
                vec![EmergencyAction::StartCountdown]
            }
            state => {
                debug!(
                    "Ignoring trigger, episode {} already {}",
                    self.episode.id, state
                );
                Vec::new()
            }
        }
    }

    /// Apply one countdown tick. Ticks outside `counting-down` are ignored.
    pub fn tick(&mut self) -> Vec<EmergencyAction> {
        if self.episode.state != EpisodeState::CountingDown {
            debug!("Ignoring stray countdown tick");
            return Vec::new();
        }

        self.episode.countdown_remaining = self.episode.countdown_remaining.saturating_sub(1);
        if self.episode.countdown_remaining > 0 {
            return Vec::new();
        }

        info!(
            "Countdown expired for episode {}, sending SOS",
            self.episode.id
        );
        let mut actions = vec![EmergencyAction::StopCountdown];
        actions.push(self.start_dispatch(DispatchReason::Auto));
        actions
    }

    /// Cancel a running countdown.
    pub fn cancel(&mut self) -> (CancelOutcome, Vec<EmergencyAction>) {
        match self.episode.state {
            EpisodeState::CountingDown => {
                let episode = self.episode.id;
                info!(
                    "Emergency episode {} cancelled with {}s remaining",
                    episode, self.episode.countdown_remaining
                );
                self.episode.state = EpisodeState::Resolved;
                self.reset();
                (
                    CancelOutcome::Cancelled,
                    vec![
                        EmergencyAction::StopCountdown,
                        EmergencyAction::Resolved {
                            episode,
                            resolution: Resolution::Cancelled,
                        },
                    ],
                )
            }
            EpisodeState::Dispatching => {
                warn!(
                    "Cancel rejected: SOS for episode {} already dispatching",
                    self.episode.id
                );
                (CancelOutcome::Rejected, Vec::new())
            }
            EpisodeState::Idle | EpisodeState::Resolved => (CancelOutcome::NothingToCancel, Vec::new()),
        }
    }

    /// Send an SOS immediately, bypassing the countdown.
    ///
    /// While a dispatch is in flight this is a no-op; after a failed
    /// dispatch it retries the same episode.
    pub fn manual_sos(&mut self, now: OffsetDateTime) -> Vec<EmergencyAction> {
        match self.episode.state {
            EpisodeState::Idle | EpisodeState::Resolved => {
                self.begin(now);
                info!("Manual SOS started episode {}", self.episode.id);
                vec![self.start_dispatch(DispatchReason::Manual)]
            }
            EpisodeState::CountingDown => {
                info!(
                    "Manual SOS for episode {} with {}s remaining",
                    self.episode.id, self.episode.countdown_remaining
                );
                let mut actions = vec![EmergencyAction::StopCountdown];
                actions.push(self.start_dispatch(DispatchReason::Manual));
                actions
            }
            EpisodeState::Dispatching if self.in_flight => {
                debug!(
                    "Manual SOS ignored, dispatch for episode {} in flight",
                    self.episode.id
                );
                Vec::new()
            }
            EpisodeState::Dispatching => {
                self.episode.redispatches += 1;
                info!(
                    "Re-dispatching SOS for episode {} (retry {})",
                    self.episode.id, self.episode.redispatches
                );
                vec![self.start_dispatch(DispatchReason::Manual)]
            }
        }
    }

    /// Record a successful dispatch. Resolves the episode.
    pub fn dispatch_succeeded(&mut self, episode: u64) -> Vec<EmergencyAction> {
        if !self.owns_dispatch(episode) {
            return Vec::new();
        }
        info!("SOS for episode {} acknowledged", episode);
        self.in_flight = false;
        self.episode.state = EpisodeState::Resolved;
        self.reset();
        vec![EmergencyAction::Resolved {
            episode,
            resolution: Resolution::Dispatched,
        }]
    }

    /// Record a failed dispatch. The episode stays in `dispatching`.
    pub fn dispatch_failed(&mut self, episode: u64) {
        if !self.owns_dispatch(episode) {
            return;
        }
        error!(
            "SOS for episode {} failed; emergency remains unresolved",
            episode
        );
        self.in_flight = false;
        self.episode.dispatch_failed = true;
    }

    fn owns_dispatch(&self, episode: u64) -> bool {
        let owns = self.episode.state == EpisodeState::Dispatching && self.episode.id == episode;
        if !owns {
            warn!("Ignoring dispatch result for stale episode {}", episode);
        }
        owns
    }

    fn begin(&mut self, now: OffsetDateTime) {
        self.episode = Episode {
            id: self.next_id,
            started_at: Some(now),
            ..Episode::default()
        };
        self.next_id += 1;
    }

    fn start_dispatch(&mut self, reason: DispatchReason) -> EmergencyAction {
        self.episode.state = EpisodeState::Dispatching;
        self.episode.countdown_remaining = 0;
        if self.episode.reason.is_none() {
            self.episode.reason = Some(reason);
        }
        self.episode.dispatch_failed = false;
        self.in_flight = true;
        EmergencyAction::Dispatch {
            episode: self.episode.id,
            reason,
        }
    }

    fn reset(&mut self) {
        self.episode = Episode::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-03-01 12:00 UTC);

    fn dispatches(actions: &[EmergencyAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, EmergencyAction::Dispatch { .. }))
            .count()
    }

    #[test]
    fn test_accident_starts_countdown() {
        let mut machine = EmergencyMachine::default();
        let actions = machine.on_accident(true, NOW);

        assert_eq!(actions, vec![EmergencyAction::StartCountdown]);
        assert_eq!(machine.episode().state, EpisodeState::CountingDown);
        assert_eq!(machine.episode().countdown_remaining, 30);
        assert_eq!(machine.episode().started_at, Some(NOW));
        assert_eq!(machine.episode().id, 1);
    }

    #[test]
    fn test_no_accident_is_noop() {
        let mut machine = EmergencyMachine::default();
        assert!(machine.on_accident(false, NOW).is_empty());
        assert_eq!(machine.episode().state, EpisodeState::Idle);
    }

    #[test]
    fn test_duplicate_trigger_is_noop() {
        let mut machine = EmergencyMachine::default();
        machine.trigger(NOW);
        machine.tick();
        assert!(machine.trigger(NOW).is_empty());
        assert_eq!(machine.episode().countdown_remaining, 29);
        assert_eq!(machine.episode().id, 1);
    }

    #[test]
    fn test_countdown_expiry_dispatches_once() {
        let mut machine = EmergencyMachine::default();
        machine.trigger(NOW);

        let mut total = 0;
        for _ in 0..29 {
            total += dispatches(&machine.tick());
        }
        assert_eq!(total, 0);
        assert_eq!(machine.episode().countdown_remaining, 1);

        let actions = machine.tick();
        assert_eq!(
            actions,
            vec![
                EmergencyAction::StopCountdown,
                EmergencyAction::Dispatch {
                    episode: 1,
                    reason: DispatchReason::Auto
                }
            ]
        );
        assert_eq!(machine.episode().state, EpisodeState::Dispatching);

        // Late ticks change nothing.
        assert!(machine.tick().is_empty());
        assert!(machine.trigger(NOW).is_empty());
    }

    #[test]
    fn test_cancel_during_countdown() {
        let mut machine = EmergencyMachine::default();
        machine.trigger(NOW);
        machine.tick();

        let (outcome, actions) = machine.cancel();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert_eq!(
            actions,
            vec![
                EmergencyAction::StopCountdown,
                EmergencyAction::Resolved {
                    episode: 1,
                    resolution: Resolution::Cancelled
                }
            ]
        );
        assert_eq!(machine.episode().state, EpisodeState::Idle);

        // Trigger detection is re-armed.
        assert_eq!(machine.trigger(NOW), vec![EmergencyAction::StartCountdown]);
        assert_eq!(machine.episode().id, 2);
    }

    #[test]
    fn test_cancel_outcomes() {
        let mut machine = EmergencyMachine::default();
        assert_eq!(machine.cancel().0, CancelOutcome::NothingToCancel);

        machine.manual_sos(NOW);
        assert_eq!(machine.cancel().0, CancelOutcome::Rejected);
        assert_eq!(machine.episode().state, EpisodeState::Dispatching);
    }

    #[test]
    fn test_manual_sos_from_countdown() {
        let mut machine = EmergencyMachine::default();
        machine.trigger(NOW);
        machine.tick();

        let actions = machine.manual_sos(NOW);
        assert_eq!(actions[0], EmergencyAction::StopCountdown);
        assert_eq!(dispatches(&actions), 1);
        assert_eq!(machine.episode().reason, Some(DispatchReason::Manual));

        // Second press while in flight does nothing.
        assert!(machine.manual_sos(NOW).is_empty());
    }

    #[test]
    fn test_dispatch_success_resolves() {
        let mut machine = EmergencyMachine::default();
        machine.manual_sos(NOW);

        let actions = machine.dispatch_succeeded(1);
        assert_eq!(
            actions,
            vec![EmergencyAction::Resolved {
                episode: 1,
                resolution: Resolution::Dispatched
            }]
        );
        assert_eq!(machine.episode().state, EpisodeState::Idle);
        assert!(!machine.is_dispatch_in_flight());
    }

    #[test]
    fn test_dispatch_failure_keeps_dispatching() {
        let mut machine = EmergencyMachine::default();
        machine.trigger(NOW);
        for _ in 0..30 {
            machine.tick();
        }
        machine.dispatch_failed(1);

        assert_eq!(machine.episode().state, EpisodeState::Dispatching);
        assert!(machine.episode().dispatch_failed);
        assert!(machine.trigger(NOW).is_empty());
        assert_eq!(machine.cancel().0, CancelOutcome::Rejected);

        // Manual re-dispatch of the same episode.
        let actions = machine.manual_sos(NOW);
        assert_eq!(
            actions,
            vec![EmergencyAction::Dispatch {
                episode: 1,
                reason: DispatchReason::Manual
            }]
        );
        assert!(!machine.episode().dispatch_failed);
    }

    #[test]
    fn test_redispatch_keeps_original_reason() {
        let mut machine = EmergencyMachine::default();
        machine.trigger(NOW);
        for _ in 0..30 {
            machine.tick();
        }
        assert_eq!(machine.episode().reason, Some(DispatchReason::Auto));
        assert_eq!(machine.episode().redispatches, 0);

        machine.dispatch_failed(1);
        machine.manual_sos(NOW);
        assert_eq!(machine.episode().reason, Some(DispatchReason::Auto));
        assert_eq!(machine.episode().redispatches, 1);

        machine.dispatch_failed(1);
        machine.manual_sos(NOW);
        assert_eq!(machine.episode().reason, Some(DispatchReason::Auto));
        assert_eq!(machine.episode().redispatches, 2);

        // A fresh episode starts clean.
        machine.dispatch_succeeded(1);
        machine.manual_sos(NOW);
        assert_eq!(machine.episode().reason, Some(DispatchReason::Manual));
        assert_eq!(machine.episode().redispatches, 0);
    }

    #[test]
    fn test_stale_dispatch_result_ignored() {
        let mut machine = EmergencyMachine::default();
        assert!(machine.dispatch_succeeded(7).is_empty());
        machine.dispatch_failed(7);
        assert_eq!(machine.episode().state, EpisodeState::Idle);
    }

    #[derive(Debug, Clone)]
    enum Input {
        Trigger,
        Tick,
        Cancel,
        Manual,
        Ack,
        Fail,
    }

    fn arb_input() -> impl Strategy<Value = Input> {
        prop_oneof![
            Just(Input::Trigger),
            Just(Input::Tick),
            Just(Input::Cancel),
            Just(Input::Manual),
            Just(Input::Ack),
            Just(Input::Fail),
        ]
    }

    proptest! {
        #[test]
        fn prop_never_two_dispatches_in_flight(inputs in prop::collection::vec(arb_input(), 0..200)) {
            let mut machine = EmergencyMachine::new(3);
            let mut in_flight = false;

            for input in inputs {
                let episode = machine.episode().id;
                let actions = match input {
                    Input::Trigger => machine.trigger(NOW),
                    Input::Tick => machine.tick(),
                    Input::Cancel => machine.cancel().1,
                    Input::Manual => machine.manual_sos(NOW),
                    Input::Ack if in_flight => machine.dispatch_succeeded(episode),
                    Input::Fail if in_flight => {
                        machine.dispatch_failed(episode);
                        Vec::new()
                    }
                    Input::Ack | Input::Fail => Vec::new(),
                };

                let n = dispatches(&actions);
                prop_assert!(n <= 1);
                if n == 1 {
                    prop_assert!(!in_flight);
                    in_flight = true;
                }
                if matches!(input, Input::Ack | Input::Fail) {
                    in_flight = false;
                }
                prop_assert_eq!(in_flight, machine.is_dispatch_in_flight());
                if machine.episode().state == EpisodeState::Dispatching {
                    prop_assert_eq!(machine.cancel().0, CancelOutcome::Rejected);
                }
            }
        }
    }
}
