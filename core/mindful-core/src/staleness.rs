//! Liveness verdicts over per-signal last-update timestamps.
//!
//! Two levels:
//!
//! - **Stale** (per signal, display only): no update in the last 20 seconds.
//! - **Likely disconnected** (aggregate): nothing has arrived from any enabled
//!   signal for a long time. Signals that naturally lag (HRV, respiratory rate)
//!   never count against the verdict while another signal is still flowing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{chrono_secs, LivenessConfig};
use crate::types::SignalType;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalLiveness {
    pub signal: SignalType,
    pub last_update: Option<DateTime<Utc>>,
    pub is_stale: bool,
    /// Never reported and the grace period is over.
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessReport {
    pub evaluated_at: DateTime<Utc>,
    pub signals: Vec<SignalLiveness>,
    pub likely_disconnected: bool,
}

impl LivenessReport {
    pub fn failed_signals(&self) -> Vec<SignalType> {
        self.signals
            .iter()
            .filter(|s| s.failed)
            .map(|s| s.signal)
            .collect()
    }

    pub fn is_stale(&self, signal: SignalType) -> bool {
        self.signals
            .iter()
            .any(|s| s.signal == signal && s.is_stale)
    }
}

#[derive(Debug, Clone)]
pub struct StalenessMonitor {
    config: LivenessConfig,
}

impl StalenessMonitor {
    pub fn new(config: LivenessConfig) -> Self {
        Self { config }
    }

    /// True iff the signal has reported and its last update is older than the stale window.
    pub fn is_stale(&self, last_update: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        last_update
            .map(|at| now - at > chrono_secs(self.config.stale_after_secs))
            .unwrap_or(false)
    }

    pub fn evaluate(
        &self,
        enabled: &[SignalType],
        last_updates: &BTreeMap<SignalType, DateTime<Utc>>,
        session_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> LivenessReport {
        let past_grace = now - session_start > chrono_secs(self.config.grace_period_secs);
        let disconnect_after = chrono_secs(self.config.disconnect_after_secs);

        let signals: Vec<SignalLiveness> = enabled
            .iter()
            .map(|signal| {
                let last_update = last_updates.get(signal).copied();
                SignalLiveness {
                    signal: *signal,
                    last_update,
                    is_stale: self.is_stale(last_update, now),
                    failed: last_update.is_none() && past_grace,
                }
            })
            .collect();

        let any_reported = signals.iter().any(|s| s.last_update.is_some());
        let any_fresh = signals
            .iter()
            .any(|s| s.last_update.is_some_and(|at| now - at <= disconnect_after));

        let likely_disconnected = if signals.is_empty() {
            false
        } else if !any_reported {
            past_grace
        } else {
            // Every reported signal is past the disconnect window; silent
            // signals only count once no other signal is fresh.
            !any_fresh
        };

        LivenessReport {
            evaluated_at: now,
            signals,
            likely_disconnected,
        }
    }
}
