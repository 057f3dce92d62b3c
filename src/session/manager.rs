//! The session manager: connection state machine, retry scheduling,
//! credential refresh orchestration and subscription replay.
//!
//! All mutable session state lives in [`SessionActor`], which runs as one
//! spawned task. Network-bound work (credential fetch/refresh) and timers
//! run as helper tasks that post their outcomes back into the actor's
//! internal channel, so a transport close arriving while a refresh is
//! outstanding is processed in order without corrupting state. A generation
//! counter invalidates callbacks from torn-down links and a sequence counter
//! logically cancels armed retry timers; `stop` always wins because the
//! forced-close flag is checked before any late callback acts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as TimeDelta, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::SessionConfig;
use crate::credentials::{CredentialError, CredentialSource, Credentials};
use crate::error::{ErrorCategory, SessionError, SessionResult};
use crate::signer::{sign_connection_url, SIGNING_SERVICE};
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::{LinkEvent, Transport, TransportLink};

use super::downtime::{DisconnectEvent, DowntimeTracker};
use super::events::{parse_device_status, ConnectionState, SessionEvent};

/// Remaining credential lifetime under which a scheduled reconnect refreshes
/// before dialing.
const REFRESH_LOOKAHEAD_SECS: i64 = 60;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle to a running session actor.
///
/// Dropping the handle closes the command channel; the actor tears down the
/// transport and exits.
pub struct Session {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events_tx: broadcast::Sender<SessionEvent>,
    status_rx: watch::Receiver<ConnectionState>,
}

impl Session {
    /// Validate the configuration and spawn the session actor.
    ///
    /// `network` comes from [`crate::network::NetworkMonitor::watch`]. The
    /// subscription registry is seeded with `config.default_topics`; the
    /// session stays idle until [`Session::start`].
    pub fn spawn(
        config: SessionConfig,
        source: Arc<dyn CredentialSource>,
        transport: Arc<dyn Transport>,
        network: watch::Receiver<bool>,
    ) -> SessionResult<Self> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(ConnectionState::Idle);

        let actor = SessionActor {
            backoff: BackoffPolicy::from_millis(config.base_backoff_ms, config.max_backoff_ms),
            registry: SubscriptionRegistry::with_topics(config.default_topics.clone()),
            config,
            source,
            transport,
            internal_tx,
            events_tx: events_tx.clone(),
            status_tx,
            state: ConnectionState::Idle,
            attempts: 0,
            downtime: DowntimeTracker::new(),
            refresh: RefreshGuard::default(),
            link: None,
            generation: 0,
            retry_seq: 0,
            retry_pending: false,
            forced_close: false,
            started: false,
            online: true,
        };
        tokio::spawn(actor.run(cmd_rx, internal_rx, network));

        Ok(Self {
            cmd_tx,
            events_tx,
            status_rx,
        })
    }

    /// Begin the connect sequence. No-op if the session is already running.
    pub fn start(&self) -> SessionResult<()> {
        self.send(Command::Start)
    }

    /// Tear down the transport and go idle. Subscriptions and the downtime
    /// log survive for a later `start`.
    pub fn stop(&self) -> SessionResult<()> {
        self.send(Command::Stop)
    }

    /// Add a topic; applied live immediately when connected, otherwise at
    /// the next replay.
    pub fn subscribe(&self, topic: impl Into<String>) -> SessionResult<()> {
        self.send(Command::Subscribe(topic.into()))
    }

    /// Remove a topic, mirroring a live unsubscribe when connected.
    pub fn unsubscribe(&self, topic: impl Into<String>) -> SessionResult<()> {
        self.send(Command::Unsubscribe(topic.into()))
    }

    /// Live-unsubscribe every member when connected, then clear the set
    /// unconditionally.
    pub fn unsubscribe_all(&self) -> SessionResult<()> {
        self.send(Command::UnsubscribeAll)
    }

    /// Publish a payload. Fails with [`SessionError::NotConnected`] unless
    /// the session is currently connected.
    pub async fn publish(&self, topic: impl Into<String>, payload: Vec<u8>) -> SessionResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Publish {
            topic: topic.into(),
            payload,
            reply,
        })?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Snapshot of the recorded outages, newest first.
    pub async fn downtime_history(&self) -> SessionResult<Vec<DisconnectEvent>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::History { reply })?;
        response.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Subscribe to the notification surface.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.status_rx.borrow()
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.status_rx.clone()
    }

    fn send(&self, command: Command) -> SessionResult<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| SessionError::SessionClosed)
    }
}

enum Command {
    Start,
    Stop,
    Subscribe(String),
    Unsubscribe(String),
    UnsubscribeAll,
    Publish {
        topic: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    History {
        reply: oneshot::Sender<Vec<DisconnectEvent>>,
    },
}

enum Internal {
    /// Event from the link opened at `generation`; stale generations are
    /// dropped.
    Link { generation: u64, event: LinkEvent },
    /// Outcome of the initial credential fetch started at `generation`.
    InitialCredentials {
        generation: u64,
        result: Result<Credentials, CredentialError>,
    },
    /// Outcome of a credential refresh.
    RefreshFinished {
        result: Result<Credentials, CredentialError>,
    },
    /// A retry timer armed with `seq` elapsed.
    RetryTimerFired { seq: u64 },
}

/// Single-flight plus cooldown bookkeeping for credential refreshes.
#[derive(Debug, Default)]
struct RefreshGuard {
    in_progress: bool,
    last_refresh_at: Option<Instant>,
}

#[derive(Debug, PartialEq, Eq)]
enum RefreshDecision {
    Begin,
    AlreadyRunning,
    CoolingDown,
}

impl RefreshGuard {
    fn decide(&self, cooldown: Duration) -> RefreshDecision {
        if self.in_progress {
            return RefreshDecision::AlreadyRunning;
        }
        match self.last_refresh_at {
            Some(at) if at.elapsed() < cooldown => RefreshDecision::CoolingDown,
            _ => RefreshDecision::Begin,
        }
    }

    fn begin(&mut self) {
        self.in_progress = true;
    }

    /// Marks completion. The timestamp is set on failure too, so a broken
    /// identity service cannot be hammered in a tight refresh loop.
    fn finish(&mut self) {
        self.in_progress = false;
        self.last_refresh_at = Some(Instant::now());
    }
}

struct SessionActor {
    config: SessionConfig,
    source: Arc<dyn CredentialSource>,
    transport: Arc<dyn Transport>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    events_tx: broadcast::Sender<SessionEvent>,
    status_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    registry: SubscriptionRegistry,
    backoff: BackoffPolicy,
    attempts: u32,
    downtime: DowntimeTracker,
    refresh: RefreshGuard,
    link: Option<Box<dyn TransportLink>>,
    generation: u64,
    retry_seq: u64,
    retry_pending: bool,
    forced_close: bool,
    started: bool,
    online: bool,
}

impl SessionActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
        mut network: watch::Receiver<bool>,
    ) {
        self.online = *network.borrow();
        let mut network_alive = true;

        loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // Handle dropped; tear down and exit.
                    None => break,
                },
                Some(message) = internal_rx.recv() => {
                    self.handle_internal(message).await;
                }
                changed = network.changed(), if network_alive => match changed {
                    Ok(()) => {
                        let online = *network.borrow_and_update();
                        self.handle_network(online).await;
                    }
                    Err(_) => network_alive = false,
                },
            }
        }

        self.teardown_link().await;
        debug!("session actor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => self.handle_start().await,
            Command::Stop => self.handle_stop().await,
            Command::Subscribe(topic) => {
                self.registry.subscribe(topic.clone());
                if self.state.is_connected() {
                    if let Some(link) = &self.link {
                        if let Err(error) = link.subscribe(std::slice::from_ref(&topic)).await {
                            warn!(%topic, %error, "live subscribe failed");
                            self.emit_error(
                                ErrorCategory::Transport,
                                format!("subscribe {topic}: {error}"),
                            );
                        }
                    }
                }
            }
            Command::Unsubscribe(topic) => {
                self.registry.unsubscribe(&topic);
                if self.state.is_connected() {
                    if let Some(link) = &self.link {
                        if let Err(error) = link.unsubscribe(&topic).await {
                            warn!(%topic, %error, "live unsubscribe failed");
                            self.emit_error(
                                ErrorCategory::Transport,
                                format!("unsubscribe {topic}: {error}"),
                            );
                        }
                    }
                }
            }
            Command::UnsubscribeAll => {
                // Live unsubscribes first, so an active broker connection
                // stops delivering stale-topic traffic; the set is cleared
                // unconditionally either way.
                if self.state.is_connected() {
                    if let Some(link) = &self.link {
                        for topic in self.registry.topics() {
                            if let Err(error) = link.unsubscribe(&topic).await {
                                warn!(%topic, %error, "live unsubscribe failed");
                            }
                        }
                    }
                }
                self.registry.clear();
            }
            Command::Publish {
                topic,
                payload,
                reply,
            } => {
                let result = self.publish(&topic, payload).await;
                let _ = reply.send(result);
            }
            Command::History { reply } => {
                let _ = reply.send(self.downtime.history().to_vec());
            }
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> SessionResult<()> {
        if !self.state.is_connected() {
            return Err(SessionError::NotConnected { state: self.state });
        }
        match &self.link {
            Some(link) => link.publish(topic, payload).await.map_err(Into::into),
            None => Err(SessionError::NotConnected { state: self.state }),
        }
    }

    async fn handle_start(&mut self) {
        // Guards duplicate sessions: starting while connected or
        // mid-reconnect is a no-op.
        if self.started {
            debug!("start ignored, session already running");
            return;
        }
        info!(endpoint = %self.config.endpoint, "starting telemetry session");
        self.started = true;
        self.forced_close = false;
        self.attempts = 0;
        self.begin_connect().await;
    }

    async fn handle_stop(&mut self) {
        if !self.started && self.state == ConnectionState::Idle {
            return;
        }
        info!("stopping telemetry session");
        self.forced_close = true;
        self.started = false;
        self.cancel_retry();
        self.teardown_link().await;
        self.transition(ConnectionState::Disconnected);
        self.transition(ConnectionState::Idle);
    }

    /// Connect sequence entry: use the cached snapshot when one exists,
    /// otherwise fetch the first one off-loop.
    async fn begin_connect(&mut self) {
        self.transition(ConnectionState::Connecting);
        match self.source.current() {
            Some(credentials) if credentials.has_access_key() => {
                self.open_link(credentials).await;
            }
            _ => {
                debug!("no cached credentials, fetching initial snapshot");
                let source = self.source.clone();
                let internal_tx = self.internal_tx.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    let result = source.fetch_initial().await;
                    let _ = internal_tx.send(Internal::InitialCredentials { generation, result });
                });
            }
        }
    }

    /// Sign a URL with `credentials` and open a fresh link. Any previous
    /// link is torn down first, so at most one live transport handle exists.
    async fn open_link(&mut self, credentials: Credentials) {
        self.transition(ConnectionState::Connecting);
        self.teardown_link().await;

        let url = match sign_connection_url(
            &credentials,
            &self.config.endpoint,
            &self.config.region,
            SIGNING_SERVICE,
            Utc::now(),
        ) {
            Ok(url) => url,
            Err(error) => {
                self.emit_error(ErrorCategory::Credential, error.to_string());
                self.transition(ConnectionState::Error);
                self.schedule_retry();
                return;
            }
        };

        match self.transport.open(url, self.config.keepalive()).await {
            Ok((link, mut events)) => {
                self.link = Some(link);
                let generation = self.generation;
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        if internal_tx
                            .send(Internal::Link { generation, event })
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
            Err(error) => {
                warn!(%error, "transport open failed");
                self.emit_error(ErrorCategory::Transport, error.to_string());
                self.schedule_retry();
            }
        }
    }

    async fn teardown_link(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(link) = self.link.take() {
            link.shutdown().await;
        }
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Link { generation, event } => {
                // Stale callbacks from a torn-down link must not resurrect
                // the session.
                if generation != self.generation || self.forced_close {
                    return;
                }
                self.handle_link_event(event).await;
            }
            Internal::InitialCredentials { generation, result } => {
                if generation != self.generation || self.forced_close {
                    return;
                }
                match result {
                    Ok(credentials) => self.open_link(credentials).await,
                    Err(error) => {
                        // The identity step itself is broken; retry the whole
                        // connect sequence rather than dialing raw.
                        warn!(%error, "initial credential fetch failed");
                        self.emit_error(ErrorCategory::Credential, error.to_string());
                        self.transition(ConnectionState::Error);
                        self.schedule_retry();
                    }
                }
            }
            Internal::RefreshFinished { result } => {
                self.refresh.finish();
                if self.forced_close {
                    // Refresh completed after stop; its outcome is a no-op.
                    return;
                }
                match result {
                    Ok(credentials) => {
                        info!("credential refresh succeeded, reconnecting");
                        self.cancel_retry();
                        self.open_link(credentials).await;
                    }
                    Err(error) => {
                        warn!(%error, "credential refresh failed");
                        self.emit_error(ErrorCategory::Credential, error.to_string());
                        self.transition(ConnectionState::Error);
                        self.schedule_retry();
                    }
                }
            }
            Internal::RetryTimerFired { seq } => {
                if seq != self.retry_seq || self.forced_close {
                    return;
                }
                self.retry_pending = false;
                self.handle_retry_due().await;
            }
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                info!("broker connection established");
                self.attempts = 0;
                self.cancel_retry();
                self.transition(ConnectionState::Connected);
                self.replay_subscriptions().await;
                if let Some(event) = self.downtime.record_reconnect(Utc::now()) {
                    info!(
                        duration_seconds = event.duration_seconds,
                        "downtime recorded"
                    );
                    self.emit(SessionEvent::DisconnectRecorded(event));
                }
            }
            LinkEvent::Message { topic, payload } => {
                let parsed = parse_device_status(&payload);
                self.emit(SessionEvent::MessageReceived {
                    topic: topic.clone(),
                    payload,
                });
                match parsed {
                    Some((device_id, status)) => {
                        self.emit(SessionEvent::DeviceStatusChanged { device_id, status });
                    }
                    None => debug!(%topic, "payload is not a single-key status record"),
                }
            }
            LinkEvent::Error(error) => {
                warn!(%error, "transport error");
                self.emit_error(ErrorCategory::Transport, error.to_string());
                if error.is_auth_rejected() {
                    // A stale credential fails identically on every plain
                    // retry; refresh instead of backing off.
                    self.refresh_and_reconnect("broker rejected signing credentials")
                        .await;
                } else {
                    self.schedule_retry();
                }
            }
            LinkEvent::Closed => {
                if !self.downtime.is_pending() {
                    self.downtime.mark_disconnected(Utc::now());
                }
                self.transition(ConnectionState::Disconnected);
                if !self.online {
                    info!("network offline, waiting for online signal");
                    return;
                }
                self.schedule_retry();
            }
        }
    }

    async fn replay_subscriptions(&mut self) {
        let topics = self.registry.topics();
        if topics.is_empty() {
            return;
        }
        if let Some(link) = &self.link {
            debug!(count = topics.len(), "replaying subscriptions");
            if let Err(error) = link.subscribe(&topics).await {
                warn!(%error, "subscription replay failed");
                self.emit_error(
                    ErrorCategory::Transport,
                    format!("subscription replay: {error}"),
                );
            }
        }
    }

    async fn handle_retry_due(&mut self) {
        if !self.online {
            // The online handler will pick this up.
            debug!("retry due while offline, deferred");
            return;
        }
        if self.state.is_connected() {
            return;
        }
        self.reconnect_now().await;
    }

    /// Tear down any stale handle and reconnect, refreshing first when the
    /// snapshot is missing or inside the expiry lookahead window.
    async fn reconnect_now(&mut self) {
        self.teardown_link().await;
        let lookahead = TimeDelta::seconds(REFRESH_LOOKAHEAD_SECS);
        match self.source.current() {
            Some(credentials)
                if credentials.has_access_key()
                    && !credentials.expires_within(lookahead, Utc::now()) =>
            {
                self.open_link(credentials).await;
            }
            _ => {
                self.refresh_and_reconnect("credentials missing or expiring soon")
                    .await;
            }
        }
    }

    fn schedule_retry(&mut self) {
        if self.forced_close {
            return;
        }
        // A transport error and its close event often arrive back to back;
        // one pending retry per failure cycle keeps the attempt counter
        // honest.
        if self.retry_pending {
            return;
        }
        let delay = self.backoff.next_delay(self.attempts);
        self.attempts += 1;
        self.retry_pending = true;
        self.retry_seq = self.retry_seq.wrapping_add(1);
        let seq = self.retry_seq;
        let internal_tx = self.internal_tx.clone();
        warn!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal_tx.send(Internal::RetryTimerFired { seq });
        });
    }

    fn cancel_retry(&mut self) {
        self.retry_pending = false;
        self.retry_seq = self.retry_seq.wrapping_add(1);
    }

    async fn refresh_and_reconnect(&mut self, reason: &str) {
        match self.refresh.decide(self.config.refresh_cooldown()) {
            RefreshDecision::AlreadyRunning => {
                debug!("credential refresh already in flight");
            }
            RefreshDecision::CoolingDown => {
                debug!("credential refresh cooling down, falling back to plain reconnect");
                self.schedule_retry();
            }
            RefreshDecision::Begin => {
                info!(reason, "refreshing credentials");
                self.refresh.begin();
                let source = self.source.clone();
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = source.refresh().await;
                    let _ = internal_tx.send(Internal::RefreshFinished { result });
                });
            }
        }
    }

    async fn handle_network(&mut self, online: bool) {
        self.online = online;
        if self.forced_close || !self.started {
            return;
        }
        if online {
            info!("network online");
            if self.state.is_connected() {
                return;
            }
            // A recovery signal is strong evidence the next attempt will
            // succeed; skip the backoff timer.
            self.cancel_retry();
            self.reconnect_now().await;
        } else {
            warn!("network offline, holding reconnect attempts");
            if self.state.is_connected() {
                self.transition(ConnectionState::Disconnected);
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, "connection state changed");
        self.state = next;
        let _ = self.status_tx.send(next);
        // Idle is the resting state after an explicit stop; it is not part
        // of the notification surface.
        if next != ConnectionState::Idle {
            self.emit(SessionEvent::StatusChanged(next));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn emit_error(&self, category: ErrorCategory, message: String) {
        self.emit(SessionEvent::ErrorOccurred { category, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_refresh_guard_single_flight() {
        let mut guard = RefreshGuard::default();
        assert_eq!(
            guard.decide(Duration::from_secs(60)),
            RefreshDecision::Begin
        );

        guard.begin();
        assert_eq!(
            guard.decide(Duration::from_secs(60)),
            RefreshDecision::AlreadyRunning
        );

        guard.finish();
        assert!(!guard.in_progress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_guard_cooldown() {
        let mut guard = RefreshGuard::default();
        guard.begin();
        guard.finish();

        assert_eq!(
            guard.decide(Duration::from_secs(60)),
            RefreshDecision::CoolingDown
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            guard.decide(Duration::from_secs(60)),
            RefreshDecision::Begin
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_guard_cooldown_applies_after_failure_too() {
        let mut guard = RefreshGuard::default();
        guard.begin();
        // finish() is called on the failure path as well.
        guard.finish();
        assert_eq!(
            guard.decide(Duration::from_secs(60)),
            RefreshDecision::CoolingDown
        );
    }
}
