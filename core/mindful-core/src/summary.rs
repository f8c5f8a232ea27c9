//! Post-session statistics computed from a sealed (or merged) session.
//!
//! Summaries are never patched. Any change to the record means a full recompute.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Session;
use crate::types::{Baselines, Sample, SignalType};
use crate::zones::{zone_breakdown, ZoneBreakdown};

/// Below this many samples a trend is not computed.
pub const MIN_TREND_SAMPLES: usize = 3;

const HRV_TREND_THRESHOLD: f64 = 2.0;
const RESPIRATORY_TREND_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub count: usize,
}

impl MetricStats {
    pub fn from_samples(samples: &[Sample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut minimum = f64::INFINITY;
        let mut maximum = f64::NEG_INFINITY;
        let mut total = 0.0;
        for sample in samples {
            minimum = minimum.min(sample.value);
            maximum = maximum.max(sample.value);
            total += sample.value;
        }
        Some(MetricStats {
            average: total / samples.len() as f64,
            minimum,
            maximum,
            count: samples.len(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<MetricStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv: Option<MetricStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respiratory_rate: Option<MetricStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vo2_max: Option<MetricStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<MetricStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv_end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv_change: Option<f64>,
    pub hrv_trend: Trend,
    pub respiratory_trend: Trend,
    #[serde(default)]
    pub zones: BTreeMap<SignalType, ZoneBreakdown>,
    pub total_samples: usize,
}

impl SessionSummary {
    pub fn stats(&self, signal: SignalType) -> Option<&MetricStats> {
        match signal {
            SignalType::HeartRate => self.heart_rate.as_ref(),
            SignalType::Hrv => self.hrv.as_ref(),
            SignalType::RespiratoryRate => self.respiratory_rate.as_ref(),
            SignalType::Vo2Max => self.vo2_max.as_ref(),
            SignalType::Temperature => self.temperature.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_samples == 0
    }
}

pub fn summarize(session: &Session, baselines: &Baselines) -> SessionSummary {
    let stats = |signal| MetricStats::from_samples(session.samples(signal));

    let hrv = session.samples(SignalType::Hrv);
    let hrv_start = hrv.first().map(|s| s.value);
    let hrv_end = hrv.last().map(|s| s.value);
    let hrv_change = match (hrv_start, hrv_end) {
        (Some(start), Some(end)) => Some(end - start),
        _ => None,
    };

    let zones = SignalType::ALL
        .into_iter()
        .filter_map(|signal| {
            zone_breakdown(session.samples(signal), signal, baselines.for_signal(signal))
                .map(|breakdown| (signal, breakdown))
        })
        .collect();

    SessionSummary {
        session_id: session.id().to_string(),
        start_date: session.start_date(),
        end_date: session.end_date(),
        duration_secs: session.duration_secs(session.end_date().unwrap_or(session.start_date())),
        heart_rate: stats(SignalType::HeartRate),
        hrv: stats(SignalType::Hrv),
        respiratory_rate: stats(SignalType::RespiratoryRate),
        vo2_max: stats(SignalType::Vo2Max),
        temperature: stats(SignalType::Temperature),
        hrv_start,
        hrv_end,
        hrv_change,
        hrv_trend: trend(hrv, HRV_TREND_THRESHOLD),
        respiratory_trend: trend(
            session.samples(SignalType::RespiratoryRate),
            RESPIRATORY_TREND_THRESHOLD,
        ),
        zones,
        total_samples: session.total_samples(),
    }
}

/// Split-half comparison: mean of the second half minus mean of the first.
pub fn trend(samples: &[Sample], threshold: f64) -> Trend {
    if samples.len() < MIN_TREND_SAMPLES {
        return Trend::InsufficientData;
    }
    let mid = samples.len() / 2;
    let mean = |half: &[Sample]| half.iter().map(|s| s.value).sum::<f64>() / half.len() as f64;
    let diff = mean(&samples[mid..]) - mean(&samples[..mid]);

    if diff > threshold {
        Trend::Increasing
    } else if diff < -threshold {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 7, 0, 0).unwrap()
    }

    fn series(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new(start() + Duration::seconds(10 * i as i64), *v))
            .collect()
    }

    fn sealed_session(hrv: &[f64]) -> Session {
        let mut session = Session::new(start());
        for sample in series(hrv) {
            session.append(SignalType::Hrv, sample);
        }
        session.append(
            SignalType::HeartRate,
            Sample::new(start() + Duration::seconds(1), 64.0),
        );
        session.append(
            SignalType::HeartRate,
            Sample::new(start() + Duration::seconds(2), 70.0),
        );
        session.seal(start() + Duration::seconds(600));
        session
    }

    #[test]
    fn rising_hrv_is_increasing() {
        assert_eq!(
            trend(&series(&[40.0, 42.0, 44.0, 48.0, 50.0]), HRV_TREND_THRESHOLD),
            Trend::Increasing
        );
    }

    #[test]
    fn flat_hrv_is_stable() {
        assert_eq!(
            trend(&series(&[50.0, 49.0, 50.0, 51.0, 50.0]), HRV_TREND_THRESHOLD),
            Trend::Stable
        );
    }

    #[test]
    fn falling_respiratory_rate_is_decreasing() {
        assert_eq!(
            trend(&series(&[14.0, 13.8, 12.9, 12.5]), RESPIRATORY_TREND_THRESHOLD),
            Trend::Decreasing
        );
    }

    #[test]
    fn trend_needs_three_samples() {
        assert_eq!(
            trend(&series(&[40.0, 60.0]), HRV_TREND_THRESHOLD),
            Trend::InsufficientData
        );
    }

    #[test]
    fn summary_reports_hrv_endpoints_and_stats() {
        let summary = summarize(
            &sealed_session(&[40.0, 42.0, 44.0, 48.0, 50.0]),
            &Baselines::default(),
        );

        assert_eq!(summary.hrv_start, Some(40.0));
        assert_eq!(summary.hrv_end, Some(50.0));
        assert_eq!(summary.hrv_change, Some(10.0));
        assert_eq!(summary.hrv_trend, Trend::Increasing);
        assert_eq!(summary.respiratory_trend, Trend::InsufficientData);

        let heart_rate = summary.heart_rate.expect("heart rate stats");
        assert_eq!(heart_rate.average, 67.0);
        assert_eq!(heart_rate.minimum, 64.0);
        assert_eq!(heart_rate.maximum, 70.0);
        assert_eq!(summary.duration_secs, 600.0);
        assert_eq!(summary.total_samples, 7);
    }

    #[test]
    fn absent_signals_are_omitted_not_zero() {
        let summary = summarize(&sealed_session(&[]), &Baselines::default());
        assert!(summary.hrv.is_none());
        assert!(summary.temperature.is_none());
        assert!(summary.hrv_change.is_none());
        assert!(!summary.zones.contains_key(&SignalType::Hrv));

        let json = serde_json::to_value(&summary).expect("serialize");
        assert!(json.get("temperature").is_none());
        assert!(json.get("heart_rate").is_some());
    }

    #[test]
    fn empty_session_summarizes_without_panicking() {
        let mut session = Session::new(start());
        session.seal(start() + Duration::seconds(30));
        let summary = summarize(&session, &Baselines::default());
        assert!(summary.is_empty());
        assert!(summary.zones.is_empty());
        assert_eq!(summary.hrv_trend, Trend::InsufficientData);
    }
}
