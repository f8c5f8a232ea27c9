//! Test doubles for the controller's collaborators.
//!
//! Compiled for unit tests and behind the `test-helpers` feature so
//! integration tests and downstream crates can drive a controller without
//! real sensors or a real device link.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mindful_protocol::{RemoteMessage, SyncPackage};

use crate::clock::Clock;
use crate::error::{AcquisitionError, AuthorizationError, TransportError};
use crate::signals::{Authorizer, ReadingSink, SignalSource};
use crate::sync::SyncTransport;
use crate::types::{Mechanism, Sample, SignalType};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.now) = now;
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

pub struct FakeAuthorizer {
    result: Result<(), AuthorizationError>,
    calls: AtomicUsize,
}

impl FakeAuthorizer {
    pub fn granted() -> Self {
        Self {
            result: Ok(()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: AuthorizationError) -> Self {
        Self {
            result: Err(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authorizer for FakeAuthorizer {
    async fn request_authorization(
        &self,
        _signals: &[SignalType],
    ) -> Result<(), AuthorizationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// A source whose readings are emitted by the test.
pub struct FakeSignalSource {
    signal: SignalType,
    fail_push: bool,
    fail_poll: bool,
    push_sink: Mutex<Option<ReadingSink>>,
    poll_sink: Mutex<Option<ReadingSink>>,
    poll_interval: Mutex<Option<StdDuration>>,
    latest: Mutex<Option<f64>>,
    history: Mutex<Vec<Sample>>,
    stop_calls: AtomicUsize,
}

impl FakeSignalSource {
    pub fn new(signal: SignalType) -> Self {
        Self {
            signal,
            fail_push: false,
            fail_poll: false,
            push_sink: Mutex::new(None),
            poll_sink: Mutex::new(None),
            poll_interval: Mutex::new(None),
            latest: Mutex::new(None),
            history: Mutex::new(Vec::new()),
            stop_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_push(mut self) -> Self {
        self.fail_push = true;
        self
    }

    pub fn failing_poll(mut self) -> Self {
        self.fail_poll = true;
        self
    }

    pub fn with_latest(self, value: f64) -> Self {
        *lock(&self.latest) = Some(value);
        self
    }

    pub fn set_history(&self, samples: Vec<Sample>) {
        *lock(&self.history) = samples;
    }

    pub fn emit_push(&self, value: f64, timestamp: DateTime<Utc>) -> bool {
        lock(&self.push_sink)
            .as_ref()
            .is_some_and(|sink| sink.deliver(value, timestamp))
    }

    pub fn emit_poll(&self, value: f64, timestamp: DateTime<Utc>) -> bool {
        lock(&self.poll_sink)
            .as_ref()
            .is_some_and(|sink| sink.deliver(value, timestamp))
    }

    pub fn push_started(&self) -> bool {
        lock(&self.push_sink).is_some()
    }

    pub fn poll_started(&self) -> bool {
        lock(&self.poll_sink).is_some()
    }

    pub fn poll_interval(&self) -> Option<StdDuration> {
        *lock(&self.poll_interval)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalSource for FakeSignalSource {
    fn signal(&self) -> SignalType {
        self.signal
    }

    fn start_push(&self, sink: ReadingSink) -> Result<(), AcquisitionError> {
        if self.fail_push {
            return Err(AcquisitionError::Unavailable {
                signal: self.signal,
                mechanism: Mechanism::Push,
                reason: "push query rejected".to_string(),
            });
        }
        *lock(&self.push_sink) = Some(sink);
        Ok(())
    }

    fn start_periodic(
        &self,
        interval: StdDuration,
        sink: ReadingSink,
    ) -> Result<(), AcquisitionError> {
        if self.fail_poll {
            return Err(AcquisitionError::Unavailable {
                signal: self.signal,
                mechanism: Mechanism::Poll,
                reason: "poll query rejected".to_string(),
            });
        }
        *lock(&self.poll_interval) = Some(interval);
        *lock(&self.poll_sink) = Some(sink);
        Ok(())
    }

    async fn fetch_latest(&self) -> Result<Option<f64>, AcquisitionError> {
        Ok(*lock(&self.latest))
    }

    async fn fetch_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, AcquisitionError> {
        Ok(lock(&self.history)
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .copied()
            .collect())
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.push_sink).take();
        lock(&self.poll_sink).take();
    }
}

/// Records every outbound message instead of sending it.
pub struct RecordingTransport {
    reachable: AtomicBool,
    fail_requests: AtomicBool,
    sent: Mutex<Vec<RemoteMessage>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            fail_requests: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes every send fail with `RequestFailed` while the link stays reachable.
    pub fn fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<RemoteMessage> {
        lock(&self.sent).clone()
    }

    fn record(&self, message: RemoteMessage) -> Result<(), TransportError> {
        if !self.is_reachable() {
            return Err(TransportError::Unreachable);
        }
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(TransportError::RequestFailed(format!(
                "{} rejected",
                message.kind()
            )));
        }
        lock(&self.sent).push(message);
        Ok(())
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncTransport for RecordingTransport {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn notify_session_started(
        &self,
        session_id: &str,
        start_date: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        self.record(RemoteMessage::SessionStarted {
            session_id: session_id.to_string(),
            start_date,
        })
    }

    async fn notify_session_ended(&self, session_id: &str) -> Result<(), TransportError> {
        self.record(RemoteMessage::SessionEnded {
            session_id: session_id.to_string(),
        })
    }

    async fn request_remote_start(&self) -> Result<(), TransportError> {
        self.record(RemoteMessage::StartRequested)
    }

    async fn request_remote_stop(&self, session_id: Option<&str>) -> Result<(), TransportError> {
        self.record(RemoteMessage::StopRequested {
            session_id: session_id.map(str::to_string),
        })
    }

    async fn send_package(&self, package: &SyncPackage) -> Result<(), TransportError> {
        self.record(RemoteMessage::Package {
            package: package.clone(),
        })
    }
}
