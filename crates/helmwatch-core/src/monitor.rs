//! The monitor runtime.
//!
//! [`Monitor::spawn`] starts one actor task that exclusively owns the
//! [`Coordinator`]. Every input is consumed by a single `biased`
//! `tokio::select!` loop in this order:
//!
//! 1. commands from [`MonitorHandle`]s
//! 2. completions of spawned subscribe and dispatch calls
//! 3. push deliveries
//! 4. poll results
//! 5. countdown ticks
//! 6. the resubscribe timer
//!
//! Commands come first so that a cancel that is already queued wins over a
//! countdown tick that is ready in the same iteration. `StopCountdown` drops
//! the ticker on the spot, so no tick is observed after a cancel.
//!
//! On shutdown an SOS call that is already in flight is allowed to finish,
//! for at most [`SHUTDOWN_GRACE`].
//!
//! Consumers read state through a [`watch`] channel of [`MonitorSnapshot`]s
//! and may subscribe to [`MonitorEvent`](crate::MonitorEvent)s.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep, timeout};
use tracing::{debug, error, info, warn};

use helmwatch_types::{ConnectionHealth, DispatchReason};

use crate::coordinator::{Coordinator, Directive, MonitorConfig, MonitorSnapshot};
use crate::dispatcher::{DispatchOutcome, SosDispatcher};
use crate::emergency::CancelOutcome;
use crate::error::{ChannelFailureReason, Error, Result};
use crate::events::{EventDispatcher, EventReceiver};
use crate::pull::{PollResult, PollStream};
use crate::push::{PushItem, PushSubscription, Topic};
use crate::traits::{PullChannel, PushChannel, SosEndpoint};

const COMMAND_BUFFER: usize = 32;

/// How long shutdown waits for an in-flight SOS call.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

enum Command {
    Trigger,
    Cancel(oneshot::Sender<CancelOutcome>),
    ManualSos(oneshot::Sender<Result<DispatchOutcome>>),
    Shutdown,
}

/// Completions of work spawned by the actor.
enum Completion {
    Subscribed(Result<PushSubscription>),
    Dispatched {
        episode: u64,
        result: Result<DispatchOutcome>,
    },
}

/// Handle to a running monitor.
///
/// Cheap to clone. The monitor stops when [`shutdown`](Self::shutdown) is
/// called or when the last handle is dropped.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<MonitorSnapshot>,
    events: EventDispatcher,
}

impl MonitorHandle {
    /// The latest consistent state.
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver that is notified on every state change.
    pub fn watch(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to monitor events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Whether the monitor task is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Start a countdown as if an accident had been reported.
    ///
    /// A no-op while an episode is already active.
    pub async fn trigger_emergency_manually(&self) -> Result<()> {
        self.send(Command::Trigger).await
    }

    /// Cancel a running countdown.
    ///
    /// Returns [`CancelOutcome::Rejected`] once the SOS dispatch has started.
    pub async fn cancel_emergency(&self) -> Result<CancelOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Cancel(tx)).await?;
        rx.await.map_err(|_| Error::MonitorStopped)
    }

    /// Send an SOS now and wait for the backend's answer.
    ///
    /// If a dispatch for the current episode is already in flight, this
    /// waits for that one instead of starting another.
    pub async fn send_manual_sos(&self) -> Result<DispatchOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ManualSos(tx)).await?;
        rx.await.map_err(|_| Error::MonitorStopped)?
    }

    /// Stop the monitor and wait for it to release its channels.
    ///
    /// An SOS call already in flight is awaited first, up to
    /// [`SHUTDOWN_GRACE`].
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_ok() {
            self.commands.closed().await;
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::MonitorStopped)
    }
}

/// The monitor actor.
pub struct Monitor {
    coordinator: Coordinator,
    push: Arc<dyn PushChannel>,
    pull: Arc<dyn PullChannel>,
    dispatcher: SosDispatcher,
    commands: mpsc::Receiver<Command>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    tasks: JoinSet<()>,
    dispatches: JoinSet<()>,
    subscription: Option<PushSubscription>,
    poll_stream: Option<PollStream>,
    countdown: Option<Interval>,
    resubscribe: Option<Pin<Box<Sleep>>>,
    sos_waiters: Vec<oneshot::Sender<Result<DispatchOutcome>>>,
    snapshot_tx: watch::Sender<MonitorSnapshot>,
    events: EventDispatcher,
}

impl Monitor {
    /// Validate `config` and start monitoring on the current tokio runtime.
    pub fn spawn(
        config: MonitorConfig,
        push: Arc<dyn PushChannel>,
        pull: Arc<dyn PullChannel>,
        sos: Arc<dyn SosEndpoint>,
    ) -> Result<MonitorHandle> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(MonitorSnapshot::default());
        let events = EventDispatcher::new(config.event_capacity);
        let dispatcher = SosDispatcher::new(sos, config.sos_retry.clone());

        let monitor = Monitor {
            coordinator: Coordinator::new(config),
            push,
            pull,
            dispatcher,
            commands: command_rx,
            completion_tx,
            completion_rx,
            tasks: JoinSet::new(),
            dispatches: JoinSet::new(),
            subscription: None,
            poll_stream: None,
            countdown: None,
            resubscribe: None,
            sos_waiters: Vec::new(),
            snapshot_tx,
            events: events.clone(),
        };
        tokio::spawn(monitor.run());

        Ok(MonitorHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            events,
        })
    }

    async fn run(mut self) {
        let directives = self.coordinator.start();
        self.execute(directives);
        self.publish();

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(completion) = self.completion_rx.recv() => self.handle_completion(completion),
                item = next_push(&mut self.subscription) => self.handle_push(item),
                result = next_poll(&mut self.poll_stream) => self.handle_poll(result),
                _ = next_tick(&mut self.countdown) => {
                    let directives = self.coordinator.on_countdown_tick();
                    self.execute(directives);
                }
                _ = resubscribe_elapsed(&mut self.resubscribe) => {
                    self.resubscribe = None;
                    let directives = self.coordinator.resubscribe_due();
                    self.execute(directives);
                }
            }
            self.publish();
            while self.tasks.try_join_next().is_some() {}
            while self.dispatches.try_join_next().is_some() {}
        }

        self.teardown().await;
    }

    fn handle_command(&mut self, command: Command) {
        let now = OffsetDateTime::now_utc();
        match command {
            Command::Trigger => {
                info!("Emergency triggered manually");
                let directives = self.coordinator.trigger_emergency(now);
                self.execute(directives);
            }
            Command::Cancel(reply) => {
                let (outcome, directives) = self.coordinator.cancel_emergency();
                self.execute(directives);
                self.publish();
                let _ = reply.send(outcome);
            }
            Command::ManualSos(reply) => {
                let directives = self.coordinator.manual_sos(now);
                self.execute(directives);
                if self.coordinator.is_dispatch_in_flight() {
                    self.sos_waiters.push(reply);
                } else {
                    let _ = reply.send(Err(Error::dispatch("no dispatch was started")));
                }
            }
            // Handled by the select loop.
            Command::Shutdown => {}
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Subscribed(Ok(subscription)) => {
                let directives = self.coordinator.on_subscribed();
                self.subscription = Some(subscription);
                self.execute(directives);
            }
            Completion::Subscribed(Err(e)) => {
                let directives = self.coordinator.on_subscribe_failed(&e);
                self.execute(directives);
            }
            Completion::Dispatched {
                episode,
                mut result,
            } => {
                let directives = self.coordinator.on_dispatch_result(episode, &mut result);
                self.execute(directives);
                self.publish();
                self.resolve_waiters(result);
            }
        }
    }

    fn handle_push(&mut self, item: Option<PushItem>) {
        let directives = match item {
            Some(Ok(message)) => self
                .coordinator
                .on_push_message(message, OffsetDateTime::now_utc()),
            Some(Err(e)) => {
                self.drop_subscription();
                self.coordinator.on_channel_lost(&e)
            }
            None => {
                self.drop_subscription();
                self.coordinator
                    .on_channel_lost(&Error::channel(ChannelFailureReason::Closed))
            }
        };
        self.execute(directives);
    }

    fn handle_poll(&mut self, result: Option<PollResult>) {
        match result {
            Some(result) => {
                let directives = self
                    .coordinator
                    .on_poll_result(result, OffsetDateTime::now_utc());
                self.execute(directives);
            }
            None => {
                self.poll_stream = None;
                if self.coordinator.is_polling() {
                    warn!("Poll loop ended unexpectedly, restarting");
                    self.start_polling();
                }
            }
        }
    }

    fn execute(&mut self, directives: Vec<Directive>) {
        for directive in directives {
            match directive {
                Directive::SubscribePush => self.spawn_subscribe(),
                Directive::Unsubscribe => self.drop_subscription(),
                Directive::StartPolling => self.start_polling(),
                Directive::StopPolling => {
                    if let Some(stream) = self.poll_stream.take() {
                        debug!("Stopping poll loop");
                        stream.close();
                    }
                }
                Directive::ScheduleResubscribe(delay) => {
                    self.resubscribe = Some(Box::pin(sleep(delay)));
                }
                Directive::StartCountdown => {
                    let period = self.coordinator.config().tick_interval;
                    let mut ticker = interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.countdown = Some(ticker);
                }
                Directive::StopCountdown => self.countdown = None,
                Directive::Dispatch {
                    episode,
                    reason,
                    health,
                } => self.spawn_dispatch(episode, reason, health),
            }
        }
    }

    fn spawn_subscribe(&mut self) {
        let push = self.push.clone();
        let tx = self.completion_tx.clone();
        self.tasks.spawn(async move {
            let result = push.subscribe(&Topic::ALL).await;
            let _ = tx.send(Completion::Subscribed(result));
        });
    }

    fn spawn_dispatch(&mut self, episode: u64, reason: DispatchReason, health: ConnectionHealth) {
        let dispatcher = self.dispatcher.clone();
        let tx = self.completion_tx.clone();
        let timestamp = OffsetDateTime::now_utc();
        self.dispatches.spawn(async move {
            let result = dispatcher.dispatch(reason, timestamp, health).await;
            let _ = tx.send(Completion::Dispatched { episode, result });
        });
    }

    fn start_polling(&mut self) {
        debug!(
            "Starting poll loop every {:?}",
            self.coordinator.config().poll.interval
        );
        self.poll_stream = Some(PollStream::start(
            self.pull.clone(),
            self.coordinator.config().poll.clone(),
        ));
    }

    fn drop_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn resolve_waiters(&mut self, result: Result<DispatchOutcome>) {
        let mut waiters = std::mem::take(&mut self.sos_waiters).into_iter();
        let Some(last) = waiters.next_back() else {
            return;
        };
        for waiter in waiters {
            let copy = match &result {
                Ok(outcome) => Ok(outcome.clone()),
                Err(e) => Err(replicate(e)),
            };
            let _ = waiter.send(copy);
        }
        let _ = last.send(result);
    }

    fn publish(&mut self) {
        for event in self.coordinator.take_events() {
            self.events.send(event);
        }
        let snapshot = self.coordinator.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    async fn teardown(&mut self) {
        info!("Monitor stopping");
        self.drop_subscription();
        if let Some(stream) = self.poll_stream.take() {
            stream.close();
        }
        self.countdown = None;
        self.resubscribe = None;
        self.tasks.abort_all();
        self.drain_dispatches().await;
        // Anything still waiting sees MonitorStopped.
        self.sos_waiters.clear();
    }

    /// Let an in-flight SOS call finish and record its result.
    async fn drain_dispatches(&mut self) {
        if self.dispatches.is_empty() {
            return;
        }
        let episode = self.coordinator.episode().id;
        info!("Waiting for the SOS call of episode {} before stopping", episode);

        let dispatches = &mut self.dispatches;
        let finished = timeout(SHUTDOWN_GRACE, async {
            while dispatches.join_next().await.is_some() {}
        })
        .await;
        if finished.is_err() {
            error!(
                "SOS call of episode {} did not finish within {:?}, abandoning it",
                episode, SHUTDOWN_GRACE
            );
            self.dispatches.abort_all();
        }

        while let Ok(completion) = self.completion_rx.try_recv() {
            match completion {
                Completion::Dispatched {
                    episode,
                    mut result,
                } => {
                    // Only the bookkeeping matters now; no new work starts.
                    let _ = self.coordinator.on_dispatch_result(episode, &mut result);
                    self.publish();
                    self.resolve_waiters(result);
                }
                Completion::Subscribed(Ok(mut subscription)) => subscription.unsubscribe(),
                Completion::Subscribed(Err(_)) => {}
            }
        }
    }
}

/// Copy a dispatch error for an additional waiter.
fn replicate(error: &Error) -> Error {
    match error {
        Error::Dispatch { status, message } => Error::Dispatch {
            status: *status,
            message: message.clone(),
        },
        Error::Timeout {
            operation,
            duration,
        } => Error::Timeout {
            operation: operation.clone(),
            duration: *duration,
        },
        Error::Cancelled => Error::Cancelled,
        other => Error::dispatch(other.to_string()),
    }
}

async fn next_push(subscription: &mut Option<PushSubscription>) -> Option<PushItem> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => pending().await,
    }
}

async fn next_poll(stream: &mut Option<PollStream>) -> Option<PollResult> {
    match stream {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn next_tick(countdown: &mut Option<Interval>) {
    match countdown {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn resubscribe_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    fn spawn(backend: &Arc<MockBackend>) -> MonitorHandle {
        Monitor::spawn(
            MonitorConfig::default(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let backend = Arc::new(MockBackend::new());
        let result = Monitor::spawn(
            MonitorConfig::default().countdown_secs(0),
            backend.clone(),
            backend.clone(),
            backend,
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_goes_live_on_start() {
        let backend = Arc::new(MockBackend::new());
        let handle = spawn(&backend);
        let mut watch = handle.watch();

        watch
            .wait_for(|s| s.health == ConnectionHealth::LivePush)
            .await
            .unwrap();
        assert!(backend.is_subscribed());
        assert_eq!(backend.poll_count(), 0);

        handle.shutdown().await;
        assert!(!handle.is_running());
        assert!(!backend.is_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_after_shutdown() {
        let backend = Arc::new(MockBackend::new());
        let handle = spawn(&backend);
        handle.shutdown().await;

        assert!(matches!(
            handle.cancel_emergency().await,
            Err(Error::MonitorStopped)
        ));
        assert!(matches!(
            handle.send_manual_sos().await,
            Err(Error::MonitorStopped)
        ));
    }

    #[test]
    fn test_replicate_keeps_status() {
        let copy = replicate(&Error::Dispatch {
            status: Some(503),
            message: "down".to_string(),
        });
        assert!(matches!(
            copy,
            Error::Dispatch {
                status: Some(503),
                ..
            }
        ));
    }
}
