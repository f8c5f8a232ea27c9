//! Shared value types: signals, zones, phases, roles and readings.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use mindful_protocol::SampleRecord as Sample;

/// The five physiological signals tracked during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    HeartRate,
    Hrv,
    RespiratoryRate,
    Vo2Max,
    Temperature,
}

impl SignalType {
    pub const ALL: [SignalType; 5] = [
        SignalType::HeartRate,
        SignalType::Hrv,
        SignalType::RespiratoryRate,
        SignalType::Vo2Max,
        SignalType::Temperature,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::HeartRate => "heart_rate",
            SignalType::Hrv => "hrv",
            SignalType::RespiratoryRate => "respiratory_rate",
            SignalType::Vo2Max => "vo2_max",
            SignalType::Temperature => "temperature",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SignalType::HeartRate => "BPM",
            SignalType::Hrv => "ms",
            SignalType::RespiratoryRate => "breaths/min",
            SignalType::Vo2Max => "mL/kg/min",
            SignalType::Temperature => "°C",
        }
    }

    /// Slow-changing signals get a one-off `fetch_latest` at tracking start.
    pub fn seeds_at_start(&self) -> bool {
        matches!(self, SignalType::Vo2Max | SignalType::Temperature)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a reading reached the ingestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    Push,
    Poll,
    Seed,
}

impl Mechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::Push => "push",
            Mechanism::Poll => "poll",
            Mechanism::Seed => "seed",
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse physiological-state classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Calm,
    Optimal,
    Elevated,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::Calm, Zone::Optimal, Zone::Elevated];

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Calm => "calm",
            Zone::Optimal => "optimal",
            Zone::Elevated => "elevated",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the two-device handoff this controller plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Acquires and summarizes locally; no remote peer.
    #[default]
    Standalone,
    /// Owns signal acquisition and ships the finished record to the display.
    Collector,
    /// Shows elapsed time and waits for the collector's package.
    Display,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Standalone => "standalone",
            Role::Collector => "collector",
            Role::Display => "display",
        }
    }

    pub fn acquires_signals(&self) -> bool {
        !matches!(self, Role::Display)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Countdown,
    Authorizing,
    Tracking,
    Stopping,
    AwaitingRemoteSummary,
    Summarized,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Countdown => "countdown",
            SessionPhase::Authorizing => "authorizing",
            SessionPhase::Tracking => "tracking",
            SessionPhase::Stopping => "stopping",
            SessionPhase::AwaitingRemoteSummary => "awaiting_remote_summary",
            SessionPhase::Summarized => "summarized",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw reading as delivered by a signal source, before throttling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub signal: SignalType,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub mechanism: Mechanism,
}

/// Personal reference values used to contextualize zones. Computed elsewhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Baselines {
    pub resting_heart_rate: Option<f64>,
    pub hrv: Option<f64>,
    pub temperature: Option<f64>,
}

impl Baselines {
    pub fn for_signal(&self, signal: SignalType) -> Option<f64> {
        match signal {
            SignalType::HeartRate => self.resting_heart_rate,
            SignalType::Hrv => self.hrv,
            SignalType::Temperature => self.temperature,
            SignalType::RespiratoryRate | SignalType::Vo2Max => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_names_round_trip_through_serde() {
        for signal in SignalType::ALL {
            let json = serde_json::to_string(&signal).unwrap();
            assert_eq!(json, format!("\"{}\"", signal.as_str()));
        }
    }

    #[test]
    fn display_role_does_not_acquire() {
        assert!(Role::Standalone.acquires_signals());
        assert!(Role::Collector.acquires_signals());
        assert!(!Role::Display.acquires_signals());
    }

    #[test]
    fn baselines_ignore_signals_without_personal_reference() {
        let baselines = Baselines {
            resting_heart_rate: Some(58.0),
            hrv: Some(44.0),
            temperature: None,
        };
        assert_eq!(baselines.for_signal(SignalType::HeartRate), Some(58.0));
        assert_eq!(baselines.for_signal(SignalType::RespiratoryRate), None);
    }
}
