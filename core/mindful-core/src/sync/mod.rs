//! Cross-device session handoff.
//!
//! The collector owns acquisition and ships one [`SyncPackage`] per session.
//! The display device waits for that package after stop, bounded by a timeout,
//! and falls back to its own (usually empty) record if it never comes.
//!
//! Packages can arrive before the display starts waiting (buffered), during
//! the wait (handed straight to the waiter), or after the display has already
//! fallen back (reported as late so the caller can fix up history).

mod loopback;
mod participant;

pub use loopback::{LoopbackPair, LoopbackTransport};
pub use participant::{
    participant_for, CollectorParticipant, DisplayParticipant, LifecycleParticipant,
    StandaloneParticipant,
};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindful_protocol::SyncPackage;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::TransportError;

/// Settled session ids remembered for late and duplicate detection.
const SETTLED_CAPACITY: usize = 32;
/// Packages held for sessions that have not started waiting yet.
const BUFFERED_CAPACITY: usize = 4;

/// Outbound half of the device link. Inbound messages are fed to
/// `SessionController::handle_remote` by whoever owns the link.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    fn is_reachable(&self) -> bool;

    async fn notify_session_started(
        &self,
        session_id: &str,
        start_date: DateTime<Utc>,
    ) -> Result<(), TransportError>;

    async fn notify_session_ended(&self, session_id: &str) -> Result<(), TransportError>;

    async fn request_remote_start(&self) -> Result<(), TransportError>;

    async fn request_remote_stop(&self, session_id: Option<&str>) -> Result<(), TransportError>;

    async fn send_package(&self, package: &SyncPackage) -> Result<(), TransportError>;
}

/// How the display device's wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffOutcome {
    /// No remote peer involved.
    Local,
    /// Collector finished its post-session HRV recovery.
    Recovered { hrv_samples: usize },
    Merged,
    TimedOut,
    Skipped,
    Unreachable,
    TransportFailed,
}

impl HandoffOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            HandoffOutcome::TimedOut
                | HandoffOutcome::Skipped
                | HandoffOutcome::Unreachable
                | HandoffOutcome::TransportFailed
        )
    }
}

/// What happened to an inbound package.
#[derive(Debug, Clone, PartialEq)]
pub enum PackageDelivery {
    /// Handed to a waiting display session.
    Consumed,
    /// No wait in progress yet; kept until one starts.
    Buffered,
    /// The session already fell back to a local summary.
    Late(SyncPackage),
    /// The session already merged a package.
    Duplicate,
}

#[derive(Debug)]
enum WaitSignal {
    Package(SyncPackage),
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Merged,
    FellBack,
}

#[derive(Default)]
struct CoordinatorState {
    waiters: HashMap<String, oneshot::Sender<WaitSignal>>,
    buffered: HashMap<String, SyncPackage>,
    buffered_order: VecDeque<String>,
    settled: HashMap<String, Settlement>,
    settled_order: VecDeque<String>,
}

impl CoordinatorState {
    /// Records how a session's wait ended, forgetting the oldest beyond capacity.
    fn settle(&mut self, session_id: &str, settlement: Settlement) {
        if self
            .settled
            .insert(session_id.to_string(), settlement)
            .is_none()
        {
            self.settled_order.push_back(session_id.to_string());
        }
        while self.settled_order.len() > SETTLED_CAPACITY {
            if let Some(oldest) = self.settled_order.pop_front() {
                self.settled.remove(&oldest);
            }
        }
    }

    fn buffer(&mut self, package: SyncPackage) {
        let session_id = package.session_id.clone();
        if self.buffered.insert(session_id.clone(), package).is_none() {
            self.buffered_order.push_back(session_id);
        }
        while self.buffered_order.len() > BUFFERED_CAPACITY {
            if let Some(oldest) = self.buffered_order.pop_front() {
                tracing::debug!(session_id = %oldest, "Dropping unclaimed buffered package");
                self.buffered.remove(&oldest);
            }
        }
    }

    fn take_buffered(&mut self, session_id: &str) -> Option<SyncPackage> {
        let package = self.buffered.remove(session_id)?;
        self.buffered_order.retain(|id| id != session_id);
        Some(package)
    }
}

/// Result of [`DeviceSyncCoordinator::await_package`].
#[derive(Debug)]
pub enum WaitResult {
    Package(SyncPackage),
    Fallback(HandoffOutcome),
}

pub struct DeviceSyncCoordinator {
    transport: Option<Arc<dyn SyncTransport>>,
    wait_timeout: StdDuration,
    state: Mutex<CoordinatorState>,
}

impl DeviceSyncCoordinator {
    pub fn new(transport: Option<Arc<dyn SyncTransport>>, wait_timeout: StdDuration) -> Self {
        Self {
            transport,
            wait_timeout,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn transport(&self) -> Option<&Arc<dyn SyncTransport>> {
        self.transport.as_ref()
    }

    pub fn is_reachable(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_reachable())
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Collector side
    // ─────────────────────────────────────────────────────────────────────

    pub async fn announce_start(&self, session_id: &str, start_date: DateTime<Utc>) {
        let Some(transport) = &self.transport else {
            return;
        };
        if let Err(err) = transport.notify_session_started(session_id, start_date).await {
            tracing::warn!(session_id = %session_id, error = %err, "Failed to announce session start");
        }
    }

    /// Sends the package, then the end-of-session notice.
    pub async fn ship_package(&self, package: &SyncPackage) -> Result<(), TransportError> {
        let Some(transport) = &self.transport else {
            return Err(TransportError::Unreachable);
        };
        transport.send_package(package).await?;
        transport.notify_session_ended(&package.session_id).await?;
        tracing::info!(
            session_id = %package.session_id,
            samples = package.total_samples(),
            "Package sent to display"
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Display side
    // ─────────────────────────────────────────────────────────────────────

    pub async fn request_remote_start(&self) -> Result<(), TransportError> {
        match &self.transport {
            Some(transport) if transport.is_reachable() => transport.request_remote_start().await,
            _ => Err(TransportError::Unreachable),
        }
    }

    /// Routes an inbound package to its waiter, the buffer, or back to the
    /// caller when it arrived too late to matter for the live summary.
    pub fn deliver(&self, package: SyncPackage) -> PackageDelivery {
        let mut state = self.lock();
        let session_id = package.session_id.clone();

        match state.settled.get(&session_id) {
            Some(Settlement::FellBack) => return PackageDelivery::Late(package),
            Some(Settlement::Merged) => return PackageDelivery::Duplicate,
            None => {}
        }

        if let Some(waiter) = state.waiters.remove(&session_id) {
            match waiter.send(WaitSignal::Package(package)) {
                Ok(()) => return PackageDelivery::Consumed,
                Err(WaitSignal::Package(package)) => {
                    // Waiter gave up between timeout and cleanup.
                    state.buffer(package);
                    return PackageDelivery::Buffered;
                }
                Err(WaitSignal::Skip) => return PackageDelivery::Buffered,
            }
        }

        state.buffer(package);
        PackageDelivery::Buffered
    }

    /// Ends every in-progress wait immediately with the local fallback.
    pub fn skip_wait(&self) -> usize {
        let waiters: Vec<_> = self.lock().waiters.drain().collect();
        let count = waiters.len();
        for (_, waiter) in waiters {
            let _ = waiter.send(WaitSignal::Skip);
        }
        count
    }

    pub fn is_waiting(&self) -> bool {
        !self.lock().waiters.is_empty()
    }

    /// Asks the collector to stop and waits for its package, bounded by the
    /// configured timeout. Never fails: every problem maps to a fallback.
    pub async fn await_package(&self, session_id: &str) -> WaitResult {
        let Some(transport) = self.transport.clone() else {
            self.settle(session_id, Settlement::FellBack);
            return WaitResult::Fallback(HandoffOutcome::Unreachable);
        };
        if !transport.is_reachable() {
            tracing::info!(session_id = %session_id, "Collector unreachable, using local summary");
            self.settle(session_id, Settlement::FellBack);
            return WaitResult::Fallback(HandoffOutcome::Unreachable);
        }

        let rx = {
            let mut state = self.lock();
            if let Some(package) = state.take_buffered(session_id) {
                state.settle(session_id, Settlement::Merged);
                return WaitResult::Package(package);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.insert(session_id.to_string(), tx);
            rx
        };

        if let Err(err) = transport.request_remote_stop(Some(session_id)).await {
            tracing::warn!(session_id = %session_id, error = %err, "Remote stop request failed");
            return self.finish_wait(session_id, HandoffOutcome::TransportFailed);
        }

        match tokio::time::timeout(self.wait_timeout, rx).await {
            Ok(Ok(WaitSignal::Package(package))) => {
                self.settle(session_id, Settlement::Merged);
                WaitResult::Package(package)
            }
            Ok(Ok(WaitSignal::Skip)) => self.finish_wait(session_id, HandoffOutcome::Skipped),
            Ok(Err(_)) => self.finish_wait(session_id, HandoffOutcome::TimedOut),
            Err(_) => {
                tracing::info!(
                    session_id = %session_id,
                    timeout_ms = self.wait_timeout.as_millis() as u64,
                    "Timed out waiting for collector package"
                );
                self.finish_wait(session_id, HandoffOutcome::TimedOut)
            }
        }
    }

    fn finish_wait(&self, session_id: &str, outcome: HandoffOutcome) -> WaitResult {
        let mut state = self.lock();
        state.waiters.remove(session_id);
        // A package may have landed in the buffer while the wait was unwinding.
        if let Some(package) = state.take_buffered(session_id) {
            state.settle(session_id, Settlement::Merged);
            return WaitResult::Package(package);
        }
        state.settle(session_id, Settlement::FellBack);
        WaitResult::Fallback(outcome)
    }

    fn settle(&self, session_id: &str, settlement: Settlement) {
        self.lock().settle(session_id, settlement);
    }
}
