//! Signal acquisition seam.
//!
//! One [`SignalSource`] per signal type, each offering a push query, a periodic
//! poll, and one-shot fetches. Both delivery paths write into the same
//! [`ReadingSink`], so throttling lives in one place (the ingestor) no matter
//! which path a reading took.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::PollingConfig;
use crate::error::{AcquisitionError, AuthorizationError};
use crate::types::{Mechanism, Reading, Sample, SignalType};

/// Non-blocking handle a source delivers readings through.
///
/// Carries the session clock so sources stamp readings on the same time base
/// the controller uses for session start and liveness.
#[derive(Clone)]
pub struct ReadingSink {
    signal: SignalType,
    mechanism: Mechanism,
    tx: mpsc::UnboundedSender<Reading>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ReadingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingSink")
            .field("signal", &self.signal)
            .field("mechanism", &self.mechanism)
            .finish_non_exhaustive()
    }
}

impl ReadingSink {
    pub fn new(
        signal: SignalType,
        mechanism: Mechanism,
        tx: mpsc::UnboundedSender<Reading>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            signal,
            mechanism,
            tx,
            clock,
        }
    }

    /// Current time on the session clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn signal(&self) -> SignalType {
        self.signal
    }

    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    /// Returns false once the session has stopped listening.
    pub fn deliver(&self, value: f64, timestamp: DateTime<Utc>) -> bool {
        self.tx
            .send(Reading {
                signal: self.signal,
                value,
                timestamp,
                mechanism: self.mechanism,
            })
            .is_ok()
    }

    /// Delivers a reading stamped with [`ReadingSink::now`].
    pub fn deliver_now(&self, value: f64) -> bool {
        self.deliver(value, self.now())
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn request_authorization(&self, signals: &[SignalType])
        -> Result<(), AuthorizationError>;
}

#[async_trait]
pub trait SignalSource: Send + Sync {
    fn signal(&self) -> SignalType;

    fn start_push(&self, sink: ReadingSink) -> Result<(), AcquisitionError>;

    fn start_periodic(
        &self,
        interval: StdDuration,
        sink: ReadingSink,
    ) -> Result<(), AcquisitionError>;

    async fn fetch_latest(&self) -> Result<Option<f64>, AcquisitionError>;

    /// Samples recorded by the platform inside `[start, end]`.
    async fn fetch_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, AcquisitionError>;

    /// Halts every mechanism this source started. Safe to call repeatedly.
    fn stop(&self);
}

/// Owns a background poll task for sources that implement polling with a timer.
#[derive(Debug, Default)]
pub struct PeriodicTask {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts polling `read` every `interval`, replacing any previous loop.
    /// Requires a running tokio runtime.
    pub fn start<F>(&self, interval: StdDuration, sink: ReadingSink, read: F)
    where
        F: Fn() -> Option<f64> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Some(value) = read() {
                    if !sink.deliver_now(value) {
                        break;
                    }
                }
            }
        });
        if let Some(previous) = self.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.lock().take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Which mechanisms came up for each signal at session start.
#[derive(Debug, Default)]
pub struct AcquisitionReport {
    pub failures: Vec<AcquisitionError>,
    /// Signals where neither push nor poll started.
    pub unavailable: Vec<SignalType>,
}

/// The authorizer plus the per-signal sources, injected into the controller.
pub struct SignalHub {
    authorizer: Arc<dyn Authorizer>,
    sources: BTreeMap<SignalType, Arc<dyn SignalSource>>,
}

impl SignalHub {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            authorizer,
            sources: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.sources.insert(source.signal(), source);
        self
    }

    pub fn source(&self, signal: SignalType) -> Option<&Arc<dyn SignalSource>> {
        self.sources.get(&signal)
    }

    pub async fn authorize(&self, signals: &[SignalType]) -> Result<(), AuthorizationError> {
        self.authorizer.request_authorization(signals).await
    }

    /// Starts push and poll for every requested signal independently.
    /// Failures are collected, never propagated.
    pub fn start(
        &self,
        signals: &[SignalType],
        polling: &PollingConfig,
        tx: &mpsc::UnboundedSender<Reading>,
        clock: &Arc<dyn Clock>,
    ) -> AcquisitionReport {
        let mut report = AcquisitionReport::default();

        for signal in signals {
            let Some(source) = self.sources.get(signal) else {
                for mechanism in [Mechanism::Push, Mechanism::Poll] {
                    report.failures.push(AcquisitionError::Unavailable {
                        signal: *signal,
                        mechanism,
                        reason: "no source registered".to_string(),
                    });
                }
                report.unavailable.push(*signal);
                continue;
            };

            let sink = |mechanism| ReadingSink::new(*signal, mechanism, tx.clone(), clock.clone());
            let push = source.start_push(sink(Mechanism::Push));
            let poll = source.start_periodic(polling.interval(*signal), sink(Mechanism::Poll));

            let push_ok = push.is_ok();
            let poll_ok = poll.is_ok();
            for result in [push, poll] {
                if let Err(err) = result {
                    tracing::warn!(signal = %signal, error = %err, "Acquisition mechanism failed to start");
                    report.failures.push(err);
                }
            }
            if !push_ok && !poll_ok {
                report.unavailable.push(*signal);
            }
        }

        report
    }

    pub async fn fetch_latest(&self, signal: SignalType) -> Result<Option<f64>, AcquisitionError> {
        match self.sources.get(&signal) {
            Some(source) => source.fetch_latest().await,
            None => Err(AcquisitionError::QueryFailed {
                signal,
                reason: "no source registered".to_string(),
            }),
        }
    }

    pub async fn fetch_between(
        &self,
        signal: SignalType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, AcquisitionError> {
        match self.sources.get(&signal) {
            Some(source) => source.fetch_between(start, end).await,
            None => Err(AcquisitionError::QueryFailed {
                signal,
                reason: "no source registered".to_string(),
            }),
        }
    }

    /// Stops every source, including ones that never started.
    pub fn stop_all(&self) {
        for source in self.sources.values() {
            source.stop();
        }
    }
}
