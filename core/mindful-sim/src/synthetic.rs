//! Synthetic sensors: mean-reverting random walks behind the `SignalSource` seam.
//!
//! Every generated value is written to the source's history. A configurable
//! share of push deliveries is dropped on the floor, which makes the history
//! the only place those values exist and gives the collector's post-session
//! HRV recovery something to find.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

use mindful_core::{
    AcquisitionError, AuthorizationError, Authorizer, Mechanism, PeriodicTask, ReadingSink,
    Sample, SignalHub, SignalSource, SignalType,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Walk {
    value: f64,
    mean: f64,
    step: f64,
    min: f64,
    max: f64,
}

impl Walk {
    pub fn for_signal(signal: SignalType) -> Self {
        let (mean, step, min, max) = match signal {
            SignalType::HeartRate => (68.0, 1.5, 45.0, 130.0),
            SignalType::Hrv => (42.0, 2.5, 10.0, 120.0),
            SignalType::RespiratoryRate => (13.0, 0.4, 6.0, 24.0),
            SignalType::Vo2Max => (44.0, 0.05, 20.0, 70.0),
            SignalType::Temperature => (36.6, 0.02, 35.5, 38.0),
        };
        Walk {
            value: mean,
            mean,
            step,
            min,
            max,
        }
    }

    pub fn current(&self) -> f64 {
        self.value
    }

    /// One step with a 10% pull back toward the mean.
    pub fn next(&mut self, rng: &mut impl Rng) -> f64 {
        let jitter = rng.gen_range(-self.step..=self.step);
        let pull = (self.mean - self.value) * 0.1;
        self.value = (self.value + pull + jitter).clamp(self.min, self.max);
        self.value
    }
}

/// How often a live sensor reports on its own.
fn push_cadence(signal: SignalType) -> Option<StdDuration> {
    match signal {
        SignalType::HeartRate => Some(StdDuration::from_secs(1)),
        SignalType::Hrv => Some(StdDuration::from_secs(5)),
        SignalType::RespiratoryRate => Some(StdDuration::from_secs(4)),
        SignalType::Temperature => Some(StdDuration::from_secs(15)),
        SignalType::Vo2Max => None,
    }
}

pub struct SyntheticSource {
    signal: SignalType,
    walk: Arc<Mutex<Walk>>,
    history: Arc<Mutex<Vec<Sample>>>,
    drop_rate: f64,
    push: PeriodicTask,
    poll: PeriodicTask,
}

impl SyntheticSource {
    pub fn new(signal: SignalType, drop_rate: f64) -> Self {
        SyntheticSource {
            signal,
            walk: Arc::new(Mutex::new(Walk::for_signal(signal))),
            history: Arc::new(Mutex::new(Vec::new())),
            drop_rate: drop_rate.clamp(0.0, 1.0),
            push: PeriodicTask::new(),
            poll: PeriodicTask::new(),
        }
    }

    pub fn history_len(&self) -> usize {
        lock(&self.history).len()
    }
}

#[async_trait]
impl SignalSource for SyntheticSource {
    fn signal(&self) -> SignalType {
        self.signal
    }

    fn start_push(&self, sink: ReadingSink) -> Result<(), AcquisitionError> {
        let Some(cadence) = push_cadence(self.signal) else {
            return Err(AcquisitionError::Unavailable {
                signal: self.signal,
                mechanism: Mechanism::Push,
                reason: "no live updates for this signal".to_string(),
            });
        };

        let walk = self.walk.clone();
        let history = self.history.clone();
        let drop_rate = self.drop_rate;
        let stamp = sink.clone();
        self.push.start(cadence, sink, move || {
            let mut rng = rand::thread_rng();
            let value = lock(&walk).next(&mut rng);
            lock(&history).push(Sample::new(stamp.now(), value));
            (!rng.gen_bool(drop_rate)).then_some(value)
        });
        Ok(())
    }

    fn start_periodic(
        &self,
        interval: StdDuration,
        sink: ReadingSink,
    ) -> Result<(), AcquisitionError> {
        let walk = self.walk.clone();
        self.poll
            .start(interval, sink, move || Some(lock(&walk).current()));
        Ok(())
    }

    async fn fetch_latest(&self) -> Result<Option<f64>, AcquisitionError> {
        Ok(Some(lock(&self.walk).current()))
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
        self.push.stop();
        self.poll.stop();
    }
}

/// Grants everything, or denies everything when asked to.
pub struct SimAuthorizer {
    deny: bool,
}

impl SimAuthorizer {
    pub fn new(deny: bool) -> Self {
        SimAuthorizer { deny }
    }
}

#[async_trait]
impl Authorizer for SimAuthorizer {
    async fn request_authorization(
        &self,
        _signals: &[SignalType],
    ) -> Result<(), AuthorizationError> {
        if self.deny {
            Err(AuthorizationError::Denied)
        } else {
            Ok(())
        }
    }
}

pub fn synthetic_hub(signals: &[SignalType], drop_rate: f64, deny: bool) -> SignalHub {
    signals.iter().fold(
        SignalHub::new(Arc::new(SimAuthorizer::new(deny))),
        |hub, signal| hub.with_source(Arc::new(SyntheticSource::new(*signal, drop_rate))),
    )
}
