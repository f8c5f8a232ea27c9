//! Turns noisy, redundant signal callbacks into a bounded session record.
//!
//! Push and poll deliveries for a signal share one entry point. Two throttles
//! run independently:
//!
//! - **Storage**: a reading is appended only if enough time has passed since
//!   the last *stored* reading of that signal (measured on reading timestamps).
//! - **Display**: the live value changes only if enough time has passed since
//!   the last *displayed* update and the value moved materially.
//!
//! The last-updated timestamp used for liveness is refreshed on every accepted
//! callback, whether or not anything was stored or displayed.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{chrono_secs, DisplayThrottleConfig, SessionConfig, StorageThrottleConfig};
use crate::session::Session;
use crate::types::{Baselines, Reading, Sample, SignalType, Zone};
use crate::zones::classify;

/// The display-facing value for one signal, zone fixed at ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveReading {
    pub signal: SignalType,
    pub value: f64,
    pub zone: Zone,
    pub timestamp: DateTime<Utc>,
    pub displayed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// No open session, or the value was not a number.
    Rejected,
    Accepted {
        stored: bool,
        displayed: Option<LiveReading>,
    },
}

impl IngestOutcome {
    pub fn stored(&self) -> bool {
        matches!(self, IngestOutcome::Accepted { stored: true, .. })
    }

    pub fn displayed(&self) -> Option<LiveReading> {
        match self {
            IngestOutcome::Accepted { displayed, .. } => *displayed,
            IngestOutcome::Rejected => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SignalState {
    last_stored_at: Option<DateTime<Utc>>,
    last_updated_at: Option<DateTime<Utc>>,
    live: Option<LiveReading>,
}

#[derive(Debug, Clone)]
pub struct SampleIngestor {
    storage: StorageThrottleConfig,
    display: DisplayThrottleConfig,
    baselines: Baselines,
    signals: BTreeMap<SignalType, SignalState>,
}

impl SampleIngestor {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            storage: config.storage_throttle.clone(),
            display: config.display_throttle.clone(),
            baselines: config.baselines,
            signals: BTreeMap::new(),
        }
    }

    /// Forgets every rate-limit timestamp and live value.
    pub fn reset(&mut self) {
        self.signals.clear();
    }

    /// Minimum spacing between stored samples for a signal at a given session age.
    pub fn storage_interval(&self, signal: SignalType, session_age: Duration) -> Duration {
        match signal {
            SignalType::Hrv if session_age >= chrono_secs(self.storage.long_session_secs) => {
                chrono_secs(self.storage.hrv_long_interval_secs)
            }
            SignalType::Hrv => chrono_secs(self.storage.hrv_interval_secs),
            _ => chrono_secs(self.storage.min_interval_secs),
        }
    }

    pub fn ingest(
        &mut self,
        session: Option<&mut Session>,
        reading: Reading,
        received_at: DateTime<Utc>,
    ) -> IngestOutcome {
        let Some(session) = session else {
            return IngestOutcome::Rejected;
        };
        if session.is_sealed() || !reading.value.is_finite() {
            return IngestOutcome::Rejected;
        }

        let session_age = reading.timestamp - session.start_date();
        let interval = self.storage_interval(reading.signal, session_age);

        let display = self.display.clone();
        let baseline = self.baselines.for_signal(reading.signal);
        let state = self.signals.entry(reading.signal).or_default();
        state.last_updated_at = Some(received_at);

        let due = state
            .last_stored_at
            .map_or(true, |last| reading.timestamp - last >= interval);
        let stored = due
            && session.append(
                reading.signal,
                Sample::new(reading.timestamp, reading.value),
            );
        if stored {
            state.last_stored_at = Some(reading.timestamp);
        }

        let displayed = if should_display(&display, reading.signal, state.live.as_ref(), reading.value, received_at) {
            let live = LiveReading {
                signal: reading.signal,
                value: reading.value,
                zone: classify(reading.signal, reading.value, baseline),
                timestamp: reading.timestamp,
                displayed_at: received_at,
            };
            state.live = Some(live);
            Some(live)
        } else {
            None
        };

        session
            .metadata_mut()
            .record_callback(reading.signal, reading.mechanism, stored);

        IngestOutcome::Accepted { stored, displayed }
    }

    pub fn live(&self, signal: SignalType) -> Option<LiveReading> {
        self.signals.get(&signal).and_then(|state| state.live)
    }

    pub fn live_readings(&self) -> Vec<LiveReading> {
        self.signals.values().filter_map(|state| state.live).collect()
    }

    pub fn last_updated(&self, signal: SignalType) -> Option<DateTime<Utc>> {
        self.signals.get(&signal).and_then(|state| state.last_updated_at)
    }

    pub fn last_updates(&self) -> BTreeMap<SignalType, DateTime<Utc>> {
        self.signals
            .iter()
            .filter_map(|(signal, state)| state.last_updated_at.map(|at| (*signal, at)))
            .collect()
    }
}

fn should_display(
    config: &DisplayThrottleConfig,
    signal: SignalType,
    previous: Option<&LiveReading>,
    value: f64,
    now: DateTime<Utc>,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    let since = now - previous.displayed_at;
    if since < chrono_secs(config.min_interval_secs) {
        return false;
    }

    let delta = (value - previous.value).abs();
    match signal {
        SignalType::HeartRate => {
            let threshold = if since < chrono_secs(config.heart_rate_fast_window_secs) {
                config.heart_rate_fast_delta
            } else {
                config.heart_rate_slow_delta
            };
            delta > threshold
        }
        _ => {
            let material = match signal {
                SignalType::Hrv => config.hrv_material_delta,
                SignalType::RespiratoryRate => config.respiratory_material_delta,
                SignalType::Vo2Max => config.vo2_max_material_delta,
                _ => config.temperature_material_delta,
            };
            delta >= material || since >= chrono_secs(config.refresh_after_secs)
        }
    }
}
