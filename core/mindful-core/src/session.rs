//! The session record and its handoff package conversions.
//!
//! A session is open while `end_date` is absent. Once sealed, the only
//! mutations allowed are the collector's post-session HRV recovery and the
//! display device's single wholesale merge of the collector's package.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mindful_protocol::SyncPackage;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::types::{Mechanism, Role, Sample, SignalType};

/// Per-signal callback bookkeeping. Diagnostics only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackCounts {
    pub push: u32,
    pub poll: u32,
    pub seed: u32,
    pub stored: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMetadata {
    pub role: Option<Role>,
    pub callbacks: BTreeMap<SignalType, CallbackCounts>,
    /// HRV samples found by the collector's post-session re-query.
    pub hrv_post_session_samples: u32,
    /// `signal:mechanism` pairs that failed to start.
    pub unavailable: Vec<String>,
}

impl SessionMetadata {
    pub(crate) fn record_callback(&mut self, signal: SignalType, mechanism: Mechanism, stored: bool) {
        let counts = self.callbacks.entry(signal).or_default();
        match mechanism {
            Mechanism::Push => counts.push += 1,
            Mechanism::Poll => counts.poll += 1,
            Mechanism::Seed => counts.seed += 1,
        }
        if stored {
            counts.stored += 1;
        }
    }

    pub(crate) fn record_unavailable(&mut self, signal: SignalType, mechanism: Mechanism) {
        let key = format!("{}:{}", signal, mechanism);
        if !self.unavailable.contains(&key) {
            self.unavailable.push(key);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("Package for session {package} does not match session {session}")]
    SessionMismatch { session: String, package: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: String,
    start_date: DateTime<Utc>,
    #[serde(default)]
    end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    heart_rate_samples: Vec<Sample>,
    #[serde(default)]
    hrv_samples: Vec<Sample>,
    #[serde(default)]
    respiratory_rate_samples: Vec<Sample>,
    #[serde(default)]
    vo2_max_samples: Vec<Sample>,
    #[serde(default)]
    temperature_samples: Vec<Sample>,
    #[serde(default)]
    metadata: SessionMetadata,
}

impl Session {
    /// Opens a new session with a generated id.
    pub fn new(start_date: DateTime<Utc>) -> Self {
        Self::with_id(Ulid::new().to_string(), start_date)
    }

    /// Opens a session shell with a known id (display device mirrors the collector's id).
    pub fn with_id(id: impl Into<String>, start_date: DateTime<Utc>) -> Self {
        Session {
            id: id.into(),
            start_date,
            end_date: None,
            heart_rate_samples: Vec::new(),
            hrv_samples: Vec::new(),
            respiratory_rate_samples: Vec::new(),
            vo2_max_samples: Vec::new(),
            temperature_samples: Vec::new(),
            metadata: SessionMetadata::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    pub fn is_sealed(&self) -> bool {
        self.end_date.is_some()
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut SessionMetadata {
        &mut self.metadata
    }

    /// Seconds elapsed; open sessions measure up to `now`.
    pub fn duration_secs(&self, now: DateTime<Utc>) -> f64 {
        let end = self.end_date.unwrap_or(now);
        (end - self.start_date).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn samples(&self, signal: SignalType) -> &[Sample] {
        match signal {
            SignalType::HeartRate => &self.heart_rate_samples,
            SignalType::Hrv => &self.hrv_samples,
            SignalType::RespiratoryRate => &self.respiratory_rate_samples,
            SignalType::Vo2Max => &self.vo2_max_samples,
            SignalType::Temperature => &self.temperature_samples,
        }
    }

    fn samples_mut(&mut self, signal: SignalType) -> &mut Vec<Sample> {
        match signal {
            SignalType::HeartRate => &mut self.heart_rate_samples,
            SignalType::Hrv => &mut self.hrv_samples,
            SignalType::RespiratoryRate => &mut self.respiratory_rate_samples,
            SignalType::Vo2Max => &mut self.vo2_max_samples,
            SignalType::Temperature => &mut self.temperature_samples,
        }
    }

    pub fn total_samples(&self) -> usize {
        SignalType::ALL
            .iter()
            .map(|signal| self.samples(*signal).len())
            .sum()
    }

    /// Appends a sample while the session is open. Returns false once sealed.
    pub(crate) fn append(&mut self, signal: SignalType, sample: Sample) -> bool {
        if self.is_sealed() {
            return false;
        }
        self.samples_mut(signal).push(sample);
        true
    }

    /// Sets the end time. Returns false if the session was already sealed.
    pub(crate) fn seal(&mut self, end_date: DateTime<Utc>) -> bool {
        if self.is_sealed() {
            return false;
        }
        self.end_date = Some(end_date.max(self.start_date));
        true
    }

    /// Adds late-written samples that fall inside the session window and are
    /// not already recorded. Keeps the sequence ordered by timestamp.
    pub(crate) fn amend_recovered(&mut self, signal: SignalType, recovered: &[Sample]) -> usize {
        let start = self.start_date;
        let end = self.end_date;
        let existing = self.samples_mut(signal);
        let mut added = 0;
        for sample in recovered {
            let in_window = sample.timestamp >= start && end.map_or(true, |e| sample.timestamp <= e);
            if !in_window || !sample.value.is_finite() {
                continue;
            }
            if existing.iter().any(|s| s.timestamp == sample.timestamp) {
                continue;
            }
            existing.push(*sample);
            added += 1;
        }
        if added > 0 {
            existing.sort_by_key(|s| s.timestamp);
        }
        added
    }

    /// Snapshot for the display device. Open sessions are stamped with `now`.
    pub fn to_package(&self, now: DateTime<Utc>) -> SyncPackage {
        let end_date = self.end_date.unwrap_or(now).max(self.start_date);
        SyncPackage {
            session_id: self.id.clone(),
            start_date: self.start_date,
            end_date,
            duration: (end_date - self.start_date).num_milliseconds() as f64 / 1000.0,
            heart_rate_samples: self.heart_rate_samples.clone(),
            hrv_samples: self.hrv_samples.clone(),
            respiratory_rate_samples: self.respiratory_rate_samples.clone(),
            vo2_max_samples: self.vo2_max_samples.clone(),
            temperature_samples: self.temperature_samples.clone(),
        }
    }

    /// Replaces all five sequences and the end time with the package's.
    /// Applying the same package twice yields the same record.
    pub fn merge_package(&mut self, package: &SyncPackage) -> Result<(), MergeError> {
        if package.session_id != self.id {
            return Err(MergeError::SessionMismatch {
                session: self.id.clone(),
                package: package.session_id.clone(),
            });
        }
        self.heart_rate_samples = package.heart_rate_samples.clone();
        self.hrv_samples = package.hrv_samples.clone();
        self.respiratory_rate_samples = package.respiratory_rate_samples.clone();
        self.vo2_max_samples = package.vo2_max_samples.clone();
        self.temperature_samples = package.temperature_samples.clone();
        self.end_date = Some(package.end_date);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 7, 0, 0).unwrap()
    }

    fn sample(offset_secs: i64, value: f64) -> Sample {
        Sample::new(start() + Duration::seconds(offset_secs), value)
    }

    fn collector_package(id: &str) -> SyncPackage {
        let mut collector = Session::with_id(id, start());
        collector.append(SignalType::HeartRate, sample(1, 70.0));
        collector.append(SignalType::HeartRate, sample(2, 68.0));
        collector.append(SignalType::Hrv, sample(5, 41.0));
        collector.append(SignalType::Temperature, sample(3, 36.4));
        collector.seal(start() + Duration::seconds(300));
        collector.to_package(Utc::now())
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(Session::new(start()).id(), Session::new(start()).id());
    }

    #[test]
    fn sealed_session_rejects_appends() {
        let mut session = Session::new(start());
        assert!(session.append(SignalType::HeartRate, sample(1, 70.0)));
        assert!(session.seal(start() + Duration::seconds(60)));
        assert!(!session.append(SignalType::HeartRate, sample(2, 71.0)));
        assert_eq!(session.samples(SignalType::HeartRate).len(), 1);
    }

    #[test]
    fn seal_is_one_shot() {
        let mut session = Session::new(start());
        assert!(session.seal(start() + Duration::seconds(60)));
        assert!(!session.seal(start() + Duration::seconds(120)));
        assert_eq!(session.end_date(), Some(start() + Duration::seconds(60)));
    }

    #[test]
    fn merge_replaces_sequences_and_end_time() {
        let package = collector_package("shared-id");
        let mut shell = Session::with_id("shared-id", start());
        shell.seal(start() + Duration::seconds(10));

        shell.merge_package(&package).expect("merge");

        for signal in SignalType::ALL {
            assert_eq!(shell.samples(signal), package_samples(&package, signal));
        }
        assert_eq!(shell.end_date(), Some(package.end_date));
    }

    #[test]
    fn merge_is_idempotent() {
        let package = collector_package("shared-id");
        let mut shell = Session::with_id("shared-id", start());
        shell.merge_package(&package).expect("first merge");
        let once = shell.clone();
        shell.merge_package(&package).expect("second merge");
        assert_eq!(shell, once);
    }

    #[test]
    fn merge_rejects_other_session() {
        let package = collector_package("collector-id");
        let mut shell = Session::with_id("display-id", start());
        assert!(matches!(
            shell.merge_package(&package),
            Err(MergeError::SessionMismatch { .. })
        ));
        assert_eq!(shell.total_samples(), 0);
    }

    #[test]
    fn recovered_samples_are_windowed_and_deduplicated() {
        let mut session = Session::new(start());
        session.append(SignalType::Hrv, sample(10, 40.0));
        session.seal(start() + Duration::seconds(60));

        let recovered = [
            sample(10, 40.0),
            sample(50, 45.0),
            sample(30, 43.0),
            sample(90, 47.0),
            sample(-5, 39.0),
        ];
        let added = session.amend_recovered(SignalType::Hrv, &recovered);

        assert_eq!(added, 2);
        let values: Vec<f64> = session
            .samples(SignalType::Hrv)
            .iter()
            .map(|s| s.value)
            .collect();
        assert_eq!(values, vec![40.0, 43.0, 45.0]);
    }

    #[test]
    fn package_duration_matches_window() {
        let package = collector_package("shared-id");
        assert_eq!(package.duration, 300.0);
        assert!(package.validate().is_ok());
    }

    fn package_samples(package: &SyncPackage, signal: SignalType) -> &[Sample] {
        match signal {
            SignalType::HeartRate => &package.heart_rate_samples,
            SignalType::Hrv => &package.hrv_samples,
            SignalType::RespiratoryRate => &package.respiratory_rate_samples,
            SignalType::Vo2Max => &package.vo2_max_samples,
            SignalType::Temperature => &package.temperature_samples,
        }
    }
}
