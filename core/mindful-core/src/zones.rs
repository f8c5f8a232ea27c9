//! Zone classification.
//!
//! The same functions tag live readings and aggregate finished sessions, so
//! they must stay pure: value + optional baseline in, zone out.

use serde::{Deserialize, Serialize};

use crate::types::{Sample, SignalType, Zone};

const HEART_RATE_CALM_MAX: f64 = 60.0;
const HEART_RATE_ELEVATED_MIN: f64 = 100.0;
const HEART_RATE_CALM_OVER_REST: f64 = 5.0;
const HEART_RATE_OPTIMAL_OVER_REST: f64 = 20.0;

const HRV_ELEVATED_MAX: f64 = 25.0;
const HRV_CALM_MIN: f64 = 45.0;
const HRV_BASELINE_BAND: f64 = 0.15;

const RESPIRATORY_OPTIMAL_MIN: f64 = 12.0;
const RESPIRATORY_ELEVATED_MIN: f64 = 16.0;

const VO2_MAX_ELEVATED_MAX: f64 = 35.0;
const VO2_MAX_OPTIMAL_MAX: f64 = 55.0;

const TEMPERATURE_OPTIMAL_MIN: f64 = 36.1;
const TEMPERATURE_OPTIMAL_MAX: f64 = 37.2;
const TEMPERATURE_BASELINE_BAND: f64 = 0.5;

/// A baseline that is zero, negative or not finite is ignored and the
/// population bounds apply.
pub fn classify(signal: SignalType, value: f64, baseline: Option<f64>) -> Zone {
    let baseline = baseline.filter(|b| b.is_finite() && *b > 0.0);
    match signal {
        SignalType::HeartRate => classify_heart_rate(value, baseline),
        SignalType::Hrv => classify_hrv(value, baseline),
        SignalType::RespiratoryRate => classify_respiratory_rate(value),
        SignalType::Vo2Max => classify_vo2_max(value),
        SignalType::Temperature => classify_temperature(value, baseline),
    }
}

fn classify_heart_rate(bpm: f64, resting: Option<f64>) -> Zone {
    match resting {
        Some(rest) if bpm <= rest + HEART_RATE_CALM_OVER_REST => Zone::Calm,
        Some(rest) if bpm <= rest + HEART_RATE_OPTIMAL_OVER_REST => Zone::Optimal,
        Some(_) => Zone::Elevated,
        None if bpm < HEART_RATE_CALM_MAX => Zone::Calm,
        None if bpm > HEART_RATE_ELEVATED_MIN => Zone::Elevated,
        None => Zone::Optimal,
    }
}

// Higher HRV is calmer.
fn classify_hrv(ms: f64, baseline: Option<f64>) -> Zone {
    match baseline {
        Some(base) if ms < base * (1.0 - HRV_BASELINE_BAND) => Zone::Elevated,
        Some(base) if ms > base * (1.0 + HRV_BASELINE_BAND) => Zone::Calm,
        Some(_) => Zone::Optimal,
        None if ms < HRV_ELEVATED_MAX => Zone::Elevated,
        None if ms > HRV_CALM_MIN => Zone::Calm,
        None => Zone::Optimal,
    }
}

fn classify_respiratory_rate(breaths: f64) -> Zone {
    if breaths > RESPIRATORY_ELEVATED_MIN {
        Zone::Elevated
    } else if breaths >= RESPIRATORY_OPTIMAL_MIN {
        Zone::Optimal
    } else {
        Zone::Calm
    }
}

// Low fitness reads as elevated strain.
fn classify_vo2_max(ml_kg_min: f64) -> Zone {
    if ml_kg_min < VO2_MAX_ELEVATED_MAX {
        Zone::Elevated
    } else if ml_kg_min <= VO2_MAX_OPTIMAL_MAX {
        Zone::Optimal
    } else {
        Zone::Calm
    }
}

fn classify_temperature(celsius: f64, baseline: Option<f64>) -> Zone {
    let (low, high) = match baseline {
        Some(base) => (base - TEMPERATURE_BASELINE_BAND, base + TEMPERATURE_BASELINE_BAND),
        None => (TEMPERATURE_OPTIMAL_MIN, TEMPERATURE_OPTIMAL_MAX),
    };
    if celsius < low {
        Zone::Calm
    } else if celsius > high {
        Zone::Elevated
    } else {
        Zone::Optimal
    }
}

/// Fraction of a sequence spent in each zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneBreakdown {
    pub calm: f64,
    pub optimal: f64,
    pub elevated: f64,
    pub dominant: Zone,
}

impl ZoneBreakdown {
    pub fn fraction(&self, zone: Zone) -> f64 {
        match zone {
            Zone::Calm => self.calm,
            Zone::Optimal => self.optimal,
            Zone::Elevated => self.elevated,
        }
    }

    fn all_in(zone: Zone) -> Self {
        let mut breakdown = ZoneBreakdown {
            calm: 0.0,
            optimal: 0.0,
            elevated: 0.0,
            dominant: zone,
        };
        breakdown.set(zone, 1.0);
        breakdown
    }

    fn set(&mut self, zone: Zone, fraction: f64) {
        match zone {
            Zone::Calm => self.calm = fraction,
            Zone::Optimal => self.optimal = fraction,
            Zone::Elevated => self.elevated = fraction,
        }
    }
}

/// Equal-weight share of samples per zone. `None` for an empty sequence.
///
/// VO2-max changes too slowly for per-sample shares to mean anything, so the
/// whole session is assigned to the zone of its average.
pub fn zone_breakdown(
    samples: &[Sample],
    signal: SignalType,
    baseline: Option<f64>,
) -> Option<ZoneBreakdown> {
    if samples.is_empty() {
        return None;
    }

    if signal == SignalType::Vo2Max {
        let average = samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64;
        return Some(ZoneBreakdown::all_in(classify(signal, average, baseline)));
    }

    let mut counts = [0usize; 3];
    for sample in samples {
        let index = match classify(signal, sample.value, baseline) {
            Zone::Calm => 0,
            Zone::Optimal => 1,
            Zone::Elevated => 2,
        };
        counts[index] += 1;
    }

    let total = samples.len() as f64;
    let mut breakdown = ZoneBreakdown {
        calm: counts[0] as f64 / total,
        optimal: counts[1] as f64 / total,
        elevated: counts[2] as f64 / total,
        dominant: Zone::Calm,
    };

    // Ties go to the first zone in calm, optimal, elevated order.
    let mut best = 0;
    for (index, count) in counts.iter().enumerate() {
        if *count > counts[best] {
            best = index;
        }
    }
    breakdown.dominant = Zone::ALL[best];
    Some(breakdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn samples(values: &[f64]) -> Vec<Sample> {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 7, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new(start + chrono::Duration::seconds(i as i64), *v))
            .collect()
    }

    #[test]
    fn heart_rate_without_baseline_uses_population_bounds() {
        assert_eq!(classify(SignalType::HeartRate, 55.0, None), Zone::Calm);
        assert_eq!(classify(SignalType::HeartRate, 60.0, None), Zone::Optimal);
        assert_eq!(classify(SignalType::HeartRate, 100.0, None), Zone::Optimal);
        assert_eq!(classify(SignalType::HeartRate, 101.0, None), Zone::Elevated);
    }

    #[test]
    fn heart_rate_with_baseline_is_relative_to_rest() {
        let rest = Some(58.0);
        assert_eq!(classify(SignalType::HeartRate, 63.0, rest), Zone::Calm);
        assert_eq!(classify(SignalType::HeartRate, 78.0, rest), Zone::Optimal);
        assert_eq!(classify(SignalType::HeartRate, 78.5, rest), Zone::Elevated);
    }

    #[test]
    fn hrv_with_baseline_uses_fifteen_percent_band() {
        let base = Some(40.0);
        assert_eq!(classify(SignalType::Hrv, 33.0, base), Zone::Elevated);
        assert_eq!(classify(SignalType::Hrv, 35.0, base), Zone::Optimal);
        assert_eq!(classify(SignalType::Hrv, 45.0, base), Zone::Optimal);
        assert_eq!(classify(SignalType::Hrv, 47.0, base), Zone::Calm);
    }

    #[test]
    fn hrv_without_baseline() {
        assert_eq!(classify(SignalType::Hrv, 20.0, None), Zone::Elevated);
        assert_eq!(classify(SignalType::Hrv, 35.0, None), Zone::Optimal);
        assert_eq!(classify(SignalType::Hrv, 50.0, None), Zone::Calm);
    }

    #[test]
    fn non_positive_baseline_falls_back_to_population_bounds() {
        for base in [0.0, -5.0, f64::NAN] {
            assert_eq!(classify(SignalType::HeartRate, 70.0, Some(base)), Zone::Optimal);
            assert_eq!(classify(SignalType::Hrv, 20.0, Some(base)), Zone::Elevated);
            assert_eq!(classify(SignalType::Hrv, 50.0, Some(base)), Zone::Calm);
            assert_eq!(
                classify(SignalType::Temperature, 36.6, Some(base)),
                Zone::Optimal
            );
        }
        let breakdown = zone_breakdown(&samples(&[70.0, 72.0]), SignalType::HeartRate, Some(0.0))
            .expect("breakdown");
        assert_eq!(breakdown.dominant, Zone::Optimal);
    }

    #[test]
    fn respiratory_rate_bands() {
        assert_eq!(classify(SignalType::RespiratoryRate, 10.0, None), Zone::Calm);
        assert_eq!(classify(SignalType::RespiratoryRate, 12.0, None), Zone::Optimal);
        assert_eq!(classify(SignalType::RespiratoryRate, 16.0, None), Zone::Optimal);
        assert_eq!(classify(SignalType::RespiratoryRate, 16.5, None), Zone::Elevated);
    }

    #[test]
    fn temperature_bands_follow_baseline_when_present() {
        assert_eq!(classify(SignalType::Temperature, 36.5, None), Zone::Optimal);
        assert_eq!(classify(SignalType::Temperature, 35.9, None), Zone::Calm);
        assert_eq!(classify(SignalType::Temperature, 37.5, None), Zone::Elevated);
        assert_eq!(
            classify(SignalType::Temperature, 37.5, Some(37.2)),
            Zone::Optimal
        );
    }

    #[test]
    fn classification_is_deterministic() {
        for signal in SignalType::ALL {
            for value in [0.0, 30.0, 36.6, 45.0, 80.0, 120.0] {
                assert_eq!(
                    classify(signal, value, Some(50.0)),
                    classify(signal, value, Some(50.0))
                );
            }
        }
    }

    #[test]
    fn breakdown_counts_each_sample_equally() {
        let breakdown =
            zone_breakdown(&samples(&[55.0, 70.0, 72.0, 110.0]), SignalType::HeartRate, None)
                .expect("breakdown");
        assert_eq!(breakdown.calm, 0.25);
        assert_eq!(breakdown.optimal, 0.5);
        assert_eq!(breakdown.elevated, 0.25);
        assert_eq!(breakdown.dominant, Zone::Optimal);
    }

    #[test]
    fn breakdown_ties_prefer_calm() {
        let breakdown = zone_breakdown(&samples(&[55.0, 110.0]), SignalType::HeartRate, None)
            .expect("breakdown");
        assert_eq!(breakdown.dominant, Zone::Calm);
    }

    #[test]
    fn vo2_max_breakdown_uses_average() {
        let breakdown = zone_breakdown(&samples(&[34.0, 40.0]), SignalType::Vo2Max, None)
            .expect("breakdown");
        assert_eq!(breakdown.optimal, 1.0);
        assert_eq!(breakdown.fraction(Zone::Elevated), 0.0);
        assert_eq!(breakdown.dominant, Zone::Optimal);
    }

    #[test]
    fn empty_sequence_has_no_breakdown() {
        assert!(zone_breakdown(&[], SignalType::Hrv, None).is_none());
    }
}
