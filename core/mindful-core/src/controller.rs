//! Top-level session state machine.
//!
//! `Idle → Countdown → Authorizing → Tracking → Stopping → {Summarized | AwaitingRemoteSummary → Summarized}`
//!
//! The controller owns the only mutable session record. Every reading from
//! every source goes through one channel and is applied by one pump task,
//! so appends and liveness updates never interleave. State is held under a
//! plain mutex that is never held across an `.await`.
//!
//! Once tracking starts, `stop` always reaches `Summarized`, whether signals
//! failed, the store is broken, or the remote device never answers.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use mindful_protocol::{parse_envelope, RemoteMessage, SyncPackage};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::clock::Clock;
use crate::config::{chrono_secs, period_secs, std_secs, SessionConfig};
use crate::error::{AcquisitionError, Result, SessionError};
use crate::ingest::{IngestOutcome, LiveReading, SampleIngestor};
use crate::session::Session;
use crate::signals::SignalHub;
use crate::staleness::{LivenessReport, StalenessMonitor};
use crate::storage::SessionStore;
use crate::summary::{summarize, SessionSummary};
use crate::sync::{
    participant_for, DeviceSyncCoordinator, HandoffOutcome, LifecycleParticipant,
    PackageDelivery, SyncTransport,
};
use crate::transition::{next_phase, PhaseEvent};
use crate::types::{Mechanism, Reading, Role, SessionPhase, SignalType};

const EVENT_CAPACITY: usize = 256;

/// Outbound state changes for whatever presents the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
    },
    CountdownTick {
        remaining: u32,
    },
    LiveValue(LiveReading),
    Tick {
        elapsed_secs: f64,
        liveness: LivenessReport,
    },
    SignalUnavailable {
        signal: SignalType,
    },
    Error {
        message: String,
    },
    SummaryReady(SessionSummary),
    /// A package arrived after the fallback summary was shown. History was
    /// updated; the summary on screen was not.
    LatePackageStored {
        session_id: String,
    },
}

/// Point-in-time view of everything the presentation layer shows.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub phase: SessionPhase,
    pub role: Role,
    pub session_id: Option<String>,
    pub elapsed_secs: f64,
    pub live: Vec<LiveReading>,
    pub liveness: Option<LivenessReport>,
    pub unavailable: Vec<SignalType>,
    pub baseline_vo2_max: Option<f64>,
    pub summary: Option<SessionSummary>,
    pub last_handoff: Option<HandoffOutcome>,
    pub error_message: Option<String>,
}

/// Collaborators injected at construction.
pub struct ControllerParts {
    pub config: SessionConfig,
    pub hub: SignalHub,
    pub transport: Option<Arc<dyn SyncTransport>>,
    pub store: Arc<dyn SessionStore>,
    pub clock: Arc<dyn Clock>,
}

struct ControllerState {
    phase: SessionPhase,
    session: Option<Session>,
    ingestor: SampleIngestor,
    liveness: Option<LivenessReport>,
    unavailable: BTreeSet<SignalType>,
    baseline_vo2_max: Option<f64>,
    summary: Option<SessionSummary>,
    last_handoff: Option<HandoffOutcome>,
    error_message: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControllerState {
    fn open_session_id(&self) -> Option<&str> {
        self.session
            .as_ref()
            .filter(|s| !s.is_sealed())
            .map(|s| s.id())
    }

    fn clear_live(&mut self) {
        self.ingestor.reset();
        self.liveness = None;
        self.baseline_vo2_max = None;
    }
}

struct Inner {
    config: SessionConfig,
    enabled: Vec<SignalType>,
    hub: Arc<SignalHub>,
    coordinator: Arc<DeviceSyncCoordinator>,
    participant: Arc<dyn LifecycleParticipant>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    monitor: StalenessMonitor,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(parts: ControllerParts) -> Self {
        let ControllerParts {
            config,
            hub,
            transport,
            store,
            clock,
        } = parts;

        let hub = Arc::new(hub);
        let coordinator = Arc::new(DeviceSyncCoordinator::new(
            transport,
            std_secs(config.timing.remote_summary_timeout_secs),
        ));
        let participant = participant_for(
            config.role,
            coordinator.clone(),
            hub.clone(),
            &config.timing,
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let state = ControllerState {
            phase: SessionPhase::Idle,
            session: None,
            ingestor: SampleIngestor::new(&config),
            liveness: None,
            unavailable: BTreeSet::new(),
            baseline_vo2_max: None,
            summary: None,
            last_handoff: None,
            error_message: None,
            tasks: Vec::new(),
        };

        SessionController {
            inner: Arc::new(Inner {
                enabled: config.enabled(),
                monitor: StalenessMonitor::new(config.liveness.clone()),
                config,
                hub,
                coordinator,
                participant,
                store,
                clock,
                state: Mutex::new(state),
                events,
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    pub fn role(&self) -> Role {
        self.inner.participant.role()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.lock().session.as_ref().map(|s| s.id().to_string())
    }

    fn current_open_id(&self) -> Option<String> {
        self.lock().open_session_id().map(str::to_string)
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        self.lock().summary.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        let now = self.now();
        let state = self.lock();
        LiveSnapshot {
            phase: state.phase,
            role: self.role(),
            session_id: state.session.as_ref().map(|s| s.id().to_string()),
            elapsed_secs: state.session.as_ref().map_or(0.0, |s| s.duration_secs(now)),
            live: state.ingestor.live_readings(),
            liveness: state.liveness.clone(),
            unavailable: state.unavailable.iter().copied().collect(),
            baseline_vo2_max: state.baseline_vo2_max,
            summary: state.summary.clone(),
            last_handoff: state.last_handoff,
            error_message: state.error_message.clone(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn advance(
        &self,
        state: &mut ControllerState,
        event: PhaseEvent,
        action: &'static str,
    ) -> Result<SessionPhase> {
        let from = state.phase;
        let to = next_phase(from, event)
            .ok_or(SessionError::InvalidTransition { phase: from, action })?;
        state.phase = to;
        tracing::debug!(from = %from, to = %to, "Phase changed");
        self.emit(SessionEvent::PhaseChanged { from, to });
        Ok(to)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Start
    // ─────────────────────────────────────────────────────────────────────

    /// Runs the countdown, authorizes, and begins tracking.
    ///
    /// On the display device this asks the collector to start instead; the
    /// local session appears when the collector announces it.
    pub async fn start(&self) -> Result<()> {
        if self.role() == Role::Display {
            return self.request_remote_start().await;
        }

        {
            let mut state = self.lock();
            if let Some(session_id) = state.open_session_id() {
                return Err(SessionError::AlreadyActive {
                    session_id: session_id.to_string(),
                });
            }
            self.advance(&mut state, PhaseEvent::StartRequested, "start")?;
            state.error_message = None;
        }

        let timing = &self.inner.config.timing;
        for remaining in (1..=timing.countdown_steps).rev() {
            if self.phase() != SessionPhase::Countdown {
                tracing::info!("Start cancelled during countdown");
                return Ok(());
            }
            self.emit(SessionEvent::CountdownTick { remaining });
            tokio::time::sleep(std_secs(timing.countdown_step_secs)).await;
        }

        {
            let mut state = self.lock();
            if state.phase != SessionPhase::Countdown {
                tracing::info!("Start cancelled during countdown");
                return Ok(());
            }
            self.advance(&mut state, PhaseEvent::CountdownFinished, "authorize")?;
        }

        if let Err(err) = self.inner.hub.authorize(&self.inner.enabled).await {
            let message = err.user_message();
            {
                let mut state = self.lock();
                if state.phase == SessionPhase::Authorizing {
                    self.advance(&mut state, PhaseEvent::AuthorizationFailed, "abort start")?;
                }
                state.error_message = Some(message.clone());
            }
            tracing::warn!(error = %err, "Authorization failed, session not started");
            self.emit(SessionEvent::Error { message });
            return Err(err.into());
        }

        let session = {
            let mut state = self.lock();
            if state.phase != SessionPhase::Authorizing {
                tracing::info!("Start cancelled during authorization");
                return Ok(());
            }
            let mut session = Session::new(self.now());
            session.metadata_mut().role = Some(self.role());
            state.clear_live();
            state.unavailable.clear();
            state.last_handoff = None;
            state.session = Some(session.clone());
            self.advance(&mut state, PhaseEvent::Authorized, "begin tracking")?;
            session
        };

        tracing::info!(
            session_id = %session.id(),
            role = %self.role(),
            signals = self.inner.enabled.len(),
            "Session started"
        );
        self.begin_tracking(&session);
        self.inner.participant.session_started(&session).await;
        Ok(())
    }

    async fn request_remote_start(&self) -> Result<()> {
        let phase = self.phase();
        if phase != SessionPhase::Idle {
            return Err(SessionError::InvalidTransition {
                phase,
                action: "request remote start",
            });
        }
        if let Err(err) = self.inner.coordinator.request_remote_start().await {
            let message = err.to_string();
            self.lock().error_message = Some(message.clone());
            self.emit(SessionEvent::Error { message });
            return Err(err.into());
        }
        Ok(())
    }

    /// Starts acquisition (if this role acquires), the reading pump, seed
    /// fetches and the liveness ticker.
    fn begin_tracking(&self, session: &Session) {
        let mut tasks = Vec::new();
        let mut report = None;

        if self.role().acquires_signals() {
            let (tx, rx) = mpsc::unbounded_channel();
            let started = self
                .inner
                .hub
                .start(
                    &self.inner.enabled,
                    &self.inner.config.polling,
                    &tx,
                    &self.inner.clock,
                );
            tasks.push(tokio::spawn(self.clone().pump(rx)));

            for signal in self.inner.enabled.iter().copied() {
                if signal.seeds_at_start() && !started.unavailable.contains(&signal) {
                    tasks.push(tokio::spawn(self.clone().seed(signal, tx.clone())));
                }
            }
            report = Some(started);
        }
        tasks.push(tokio::spawn(self.clone().run_ticker()));

        let mut state = self.lock();
        let current = state.open_session_id() == Some(session.id());
        if state.phase != SessionPhase::Tracking || !current {
            // Stopped while we were starting up.
            drop(state);
            for task in tasks {
                task.abort();
            }
            self.inner.hub.stop_all();
            return;
        }
        state.tasks.extend(tasks);

        let Some(report) = report else {
            return;
        };
        if let Some(session) = state.session.as_mut() {
            for failure in &report.failures {
                if let AcquisitionError::Unavailable {
                    signal, mechanism, ..
                } = failure
                {
                    session.metadata_mut().record_unavailable(*signal, *mechanism);
                }
            }
            for signal in report.unavailable.iter().filter(|s| s.seeds_at_start()) {
                session
                    .metadata_mut()
                    .record_unavailable(*signal, Mechanism::Seed);
            }
        }
        state.unavailable.extend(report.unavailable.iter().copied());
        drop(state);

        for signal in report.unavailable {
            tracing::warn!(signal = %signal, "Signal unavailable for this session");
            self.emit(SessionEvent::SignalUnavailable { signal });
        }
    }

    async fn pump(self, mut rx: mpsc::UnboundedReceiver<Reading>) {
        while let Some(reading) = rx.recv().await {
            self.ingest_reading(reading);
        }
    }

    async fn seed(self, signal: SignalType, tx: mpsc::UnboundedSender<Reading>) {
        match self.inner.hub.fetch_latest(signal).await {
            Ok(Some(value)) => {
                let _ = tx.send(Reading {
                    signal,
                    value,
                    timestamp: self.now(),
                    mechanism: Mechanism::Seed,
                });
            }
            Ok(None) => tracing::debug!(signal = %signal, "No seed value available"),
            Err(err) => tracing::warn!(signal = %signal, error = %err, "Seed fetch failed"),
        }
    }

    async fn run_ticker(self) {
        let period = period_secs(self.inner.config.timing.tick_secs);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tracking
    // ─────────────────────────────────────────────────────────────────────

    /// Applies one reading. Never fails; rejected readings are dropped.
    pub fn ingest_reading(&self, reading: Reading) -> IngestOutcome {
        let now = self.now();
        let mut guard = self.lock();
        if guard.phase != SessionPhase::Tracking {
            return IngestOutcome::Rejected;
        }
        let state = &mut *guard;
        let outcome = state.ingestor.ingest(state.session.as_mut(), reading, now);

        if reading.mechanism == Mechanism::Seed
            && reading.signal == SignalType::Vo2Max
            && outcome != IngestOutcome::Rejected
        {
            state.baseline_vo2_max = Some(reading.value);
        }
        drop(guard);

        if let Some(live) = outcome.displayed() {
            self.emit(SessionEvent::LiveValue(live));
        }
        outcome
    }

    /// Re-evaluates liveness. Driven at 1 Hz while tracking.
    pub fn tick(&self) -> Option<LivenessReport> {
        let now = self.now();
        let mut state = self.lock();
        if state.phase != SessionPhase::Tracking {
            return None;
        }
        let session = state.session.as_ref()?;
        let elapsed_secs = session.duration_secs(now);
        let start = session.start_date();

        let enabled: &[SignalType] = if self.role().acquires_signals() {
            &self.inner.enabled
        } else {
            &[]
        };
        let report =
            self.inner
                .monitor
                .evaluate(enabled, &state.ingestor.last_updates(), start, now);

        let was_disconnected = state
            .liveness
            .as_ref()
            .is_some_and(|l| l.likely_disconnected);
        if report.likely_disconnected && !was_disconnected {
            tracing::warn!(
                failed = ?report.failed_signals(),
                "No signal data arriving, sensor likely disconnected"
            );
        }
        state.liveness = Some(report.clone());
        drop(state);

        self.emit(SessionEvent::Tick {
            elapsed_secs,
            liveness: report.clone(),
        });
        Some(report)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stop
    // ─────────────────────────────────────────────────────────────────────

    /// Stops tracking and produces the summary.
    ///
    /// A no-op unless tracking (or still starting up, which cancels the start).
    pub async fn stop(&self) -> Result<()> {
        let (mut session, tasks) = {
            let mut state = self.lock();
            match state.phase {
                SessionPhase::Countdown | SessionPhase::Authorizing => {
                    self.advance(&mut state, PhaseEvent::Cancelled, "cancel start")?;
                    return Ok(());
                }
                SessionPhase::Tracking => {}
                _ => return Ok(()),
            }
            self.advance(&mut state, PhaseEvent::StopRequested, "stop")?;
            let tasks = std::mem::take(&mut state.tasks);
            let Some(session) = state.session.take() else {
                tracing::error!("Tracking without a session record");
                self.advance(&mut state, PhaseEvent::Summarized, "summarize")?;
                return Ok(());
            };
            (session, tasks)
        };

        for task in tasks {
            task.abort();
        }
        self.inner.hub.stop_all();
        session.seal(self.now());
        self.persist(&session);
        tracing::info!(
            session_id = %session.id(),
            samples = session.total_samples(),
            duration_secs = session.duration_secs(self.now()),
            "Session sealed"
        );

        if self.role() == Role::Display {
            let mut state = self.lock();
            self.advance(&mut state, PhaseEvent::AwaitRemote, "await remote summary")?;
        }

        let outcome = self.inner.participant.finish_session(&mut session).await;
        let summary = summarize(&session, &self.inner.config.baselines);
        self.persist(&session);
        self.inner.participant.session_finalized(&session).await;

        {
            let mut state = self.lock();
            state.summary = Some(summary.clone());
            state.last_handoff = Some(outcome);
            state.clear_live();
            self.advance(&mut state, PhaseEvent::Summarized, "summarize")?;
        }
        tracing::info!(
            session_id = %session.id(),
            outcome = ?outcome,
            samples = summary.total_samples,
            "Session summarized"
        );
        self.emit(SessionEvent::SummaryReady(summary));
        Ok(())
    }

    /// Ends a display-side wait for the collector immediately.
    pub fn skip_remote_wait(&self) -> bool {
        self.inner.coordinator.skip_wait() > 0
    }

    pub fn dismiss(&self) -> Result<()> {
        let mut state = self.lock();
        self.advance(&mut state, PhaseEvent::Dismissed, "dismiss")?;
        state.summary = None;
        state.last_handoff = None;
        Ok(())
    }

    fn persist(&self, session: &Session) {
        if let Err(err) = self.inner.store.save(session) {
            tracing::error!(session_id = %session.id(), error = %err, "Failed to save session");
        }
    }

    /// Shows the most recent stored summary if it ended within the restore
    /// window. Only applies when idle with nothing on screen.
    pub fn restore_recent_summary(&self) -> Result<Option<SessionSummary>> {
        {
            let state = self.lock();
            if state.phase != SessionPhase::Idle || state.summary.is_some() {
                return Ok(None);
            }
        }

        let Some(latest) = self
            .inner
            .store
            .load_all()?
            .into_iter()
            .find(|s| s.is_sealed())
        else {
            return Ok(None);
        };
        let Some(ended) = latest.end_date() else {
            return Ok(None);
        };
        let window = chrono_secs(self.inner.config.timing.recent_summary_window_secs);
        if self.now() - ended > window {
            return Ok(None);
        }

        let summary = summarize(&latest, &self.inner.config.baselines);
        {
            let mut state = self.lock();
            if state.phase != SessionPhase::Idle {
                return Ok(None);
            }
            self.advance(&mut state, PhaseEvent::Restored, "restore summary")?;
            state.summary = Some(summary.clone());
        }
        tracing::info!(session_id = %latest.id(), "Restored recent summary");
        self.emit(SessionEvent::SummaryReady(summary.clone()));
        Ok(Some(summary))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Remote messages
    // ─────────────────────────────────────────────────────────────────────

    /// Handles one validated message from the peer device.
    pub async fn handle_remote(&self, message: RemoteMessage) {
        let role = self.role();
        tracing::debug!(kind = message.kind(), role = %role, "Remote message received");

        match (role, message) {
            (
                Role::Display,
                RemoteMessage::SessionStarted {
                    session_id,
                    start_date,
                },
            ) => {
                if let Err(err) = self.mirror_remote_start(session_id, start_date) {
                    tracing::warn!(error = %err, "Ignoring remote session start");
                }
            }
            (Role::Display, RemoteMessage::SessionEnded { session_id }) => {
                if self.current_open_id().as_deref() == Some(session_id.as_str()) {
                    if let Err(err) = self.stop().await {
                        tracing::warn!(error = %err, "Failed to stop mirrored session");
                    }
                }
            }
            (Role::Display, RemoteMessage::Package { package }) => self.receive_package(package),
            (Role::Collector, RemoteMessage::StartRequested) => {
                if self.phase() == SessionPhase::Summarized {
                    let _ = self.dismiss();
                }
                if let Err(err) = self.start().await {
                    tracing::warn!(error = %err, "Remote start request failed");
                }
            }
            (Role::Collector, RemoteMessage::StopRequested { session_id }) => {
                let current = self.current_open_id();
                let matches = match (&session_id, &current) {
                    (Some(requested), Some(current)) => requested == current,
                    (None, _) => true,
                    (Some(_), None) => false,
                };
                if matches {
                    if let Err(err) = self.stop().await {
                        tracing::warn!(error = %err, "Remote stop request failed");
                    }
                }
            }
            (role, message) => {
                tracing::debug!(kind = message.kind(), role = %role, "Message not handled by this role");
            }
        }
    }

    fn mirror_remote_start(&self, session_id: String, start_date: DateTime<Utc>) -> Result<()> {
        let session = {
            let mut state = self.lock();
            if let Some(open) = state.open_session_id() {
                return Err(SessionError::AlreadyActive {
                    session_id: open.to_string(),
                });
            }
            if state.phase == SessionPhase::Summarized {
                self.advance(&mut state, PhaseEvent::Dismissed, "dismiss")?;
                state.summary = None;
            }
            let mut session = Session::with_id(session_id, start_date);
            session.metadata_mut().role = Some(Role::Display);
            state.clear_live();
            state.unavailable.clear();
            state.last_handoff = None;
            state.error_message = None;
            state.session = Some(session.clone());
            self.advance(&mut state, PhaseEvent::RemoteStarted, "mirror remote session")?;
            session
        };
        tracing::info!(session_id = %session.id(), "Mirroring collector session");
        self.begin_tracking(&session);
        Ok(())
    }

    fn receive_package(&self, package: SyncPackage) {
        let session_id = package.session_id.clone();
        match self.inner.coordinator.deliver(package) {
            PackageDelivery::Late(package) => self.store_late_package(package),
            delivery => {
                tracing::debug!(session_id = %session_id, delivery = ?delivery, "Package routed");
            }
        }
    }

    /// Completes history with a package that missed the wait. The summary
    /// already on screen is left alone.
    fn store_late_package(&self, package: SyncPackage) {
        let mut session = match self.inner.store.load(&package.session_id) {
            Ok(Some(session)) => session,
            Ok(None) => Session::with_id(package.session_id.clone(), package.start_date),
            Err(err) => {
                tracing::error!(session_id = %package.session_id, error = %err, "Cannot load session for late package");
                return;
            }
        };
        if let Err(err) = session.merge_package(&package) {
            tracing::warn!(error = %err, "Late package does not match stored session");
            return;
        }
        if let Err(err) = self.inner.store.save(&session) {
            tracing::error!(session_id = %session.id(), error = %err, "Failed to save late package");
            return;
        }
        tracing::info!(
            session_id = %session.id(),
            samples = session.total_samples(),
            "Stored late package without replacing shown summary"
        );
        self.emit(SessionEvent::LatePackageStored {
            session_id: session.id().to_string(),
        });
    }

    /// Feeds encoded envelopes from a device link into `handle_remote`.
    /// Each message is handled on its own task so a long stop never blocks
    /// the package it is waiting for.
    pub fn serve(&self, mut inbox: mpsc::UnboundedReceiver<Vec<u8>>) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(bytes) = inbox.recv().await {
                match parse_envelope(&bytes) {
                    Ok(envelope) => {
                        let controller = controller.clone();
                        tokio::spawn(async move {
                            controller.handle_remote(envelope.message).await;
                        });
                    }
                    Err(err) => {
                        tracing::warn!(code = %err.code, error = %err.message, "Dropping invalid remote message");
                    }
                }
            }
        })
    }
}
