//! Session engine configuration.
//!
//! Loaded from `~/.mindful/session.toml`. Every field has a default, so a
//! missing file or a partial file is valid:
//!
//! ```toml
//! role = "collector"
//! enabled_signals = ["heart_rate", "hrv", "respiratory_rate"]
//!
//! [timing]
//! remote_summary_timeout_secs = 10.0
//!
//! [storage_throttle]
//! hrv_long_interval_secs = 10.0
//!
//! [baselines]
//! resting_heart_rate = 58.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Deserialize;

use crate::error::{Result, SessionError};
use crate::types::{Baselines, Role, SignalType};

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".mindful/session.toml";

/// Floor for timer periods; tokio rejects a zero period.
const MIN_PERIOD: StdDuration = StdDuration::from_millis(1);

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Countdown ticks before authorization (3, 2, 1).
    pub countdown_steps: u32,
    pub countdown_step_secs: f64,
    /// Liveness evaluation period.
    pub tick_secs: f64,
    /// Collector pause before re-querying late HRV samples.
    pub hrv_recovery_delay_secs: f64,
    /// Display wait for the collector's package.
    pub remote_summary_timeout_secs: f64,
    /// Window after which a stored summary is no longer restored on launch.
    pub recent_summary_window_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            countdown_steps: 3,
            countdown_step_secs: 1.0,
            tick_secs: 1.0,
            hrv_recovery_delay_secs: 2.0,
            remote_summary_timeout_secs: 10.0,
            recent_summary_window_secs: 300.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageThrottleConfig {
    pub min_interval_secs: f64,
    pub hrv_interval_secs: f64,
    pub hrv_long_interval_secs: f64,
    /// Session age at which HRV switches to the long interval.
    pub long_session_secs: f64,
}

impl Default for StorageThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 1.0,
            hrv_interval_secs: 5.0,
            hrv_long_interval_secs: 10.0,
            long_session_secs: 1800.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayThrottleConfig {
    pub min_interval_secs: f64,
    /// Heart-rate updates within this window need the larger delta.
    pub heart_rate_fast_window_secs: f64,
    pub heart_rate_fast_delta: f64,
    pub heart_rate_slow_delta: f64,
    pub hrv_material_delta: f64,
    pub respiratory_material_delta: f64,
    pub vo2_max_material_delta: f64,
    pub temperature_material_delta: f64,
    /// Non-heart-rate signals refresh after this long even without a material change.
    pub refresh_after_secs: f64,
}

impl Default for DisplayThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 1.0,
            heart_rate_fast_window_secs: 3.0,
            heart_rate_fast_delta: 2.0,
            heart_rate_slow_delta: 1.0,
            hrv_material_delta: 1.0,
            respiratory_material_delta: 0.5,
            vo2_max_material_delta: 0.1,
            temperature_material_delta: 0.05,
            refresh_after_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LivenessConfig {
    pub stale_after_secs: f64,
    pub disconnect_after_secs: f64,
    pub grace_period_secs: f64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 20.0,
            disconnect_after_secs: 60.0,
            grace_period_secs: 45.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    pub heart_rate_secs: f64,
    pub hrv_secs: f64,
    pub respiratory_rate_secs: f64,
    pub vo2_max_secs: f64,
    pub temperature_secs: f64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            heart_rate_secs: 3.0,
            hrv_secs: 5.0,
            respiratory_rate_secs: 5.0,
            vo2_max_secs: 30.0,
            temperature_secs: 30.0,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self, signal: SignalType) -> StdDuration {
        let secs = match signal {
            SignalType::HeartRate => self.heart_rate_secs,
            SignalType::Hrv => self.hrv_secs,
            SignalType::RespiratoryRate => self.respiratory_rate_secs,
            SignalType::Vo2Max => self.vo2_max_secs,
            SignalType::Temperature => self.temperature_secs,
        };
        period_secs(secs)
    }

    fn all(&self) -> [(&'static str, f64); 5] {
        [
            ("polling.heart_rate_secs", self.heart_rate_secs),
            ("polling.hrv_secs", self.hrv_secs),
            ("polling.respiratory_rate_secs", self.respiratory_rate_secs),
            ("polling.vo2_max_secs", self.vo2_max_secs),
            ("polling.temperature_secs", self.temperature_secs),
        ]
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub role: Role,
    pub enabled_signals: Vec<SignalType>,
    pub timing: TimingConfig,
    pub storage_throttle: StorageThrottleConfig,
    pub display_throttle: DisplayThrottleConfig,
    pub liveness: LivenessConfig,
    pub polling: PollingConfig,
    pub baselines: Baselines,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            enabled_signals: SignalType::ALL.to_vec(),
            timing: TimingConfig::default(),
            storage_throttle: StorageThrottleConfig::default(),
            display_throttle: DisplayThrottleConfig::default(),
            liveness: LivenessConfig::default(),
            polling: PollingConfig::default(),
            baselines: Baselines::default(),
        }
    }
}

impl SessionConfig {
    pub fn is_enabled(&self, signal: SignalType) -> bool {
        self.enabled_signals.contains(&signal)
    }

    /// Enabled signals in canonical order, without duplicates.
    pub fn enabled(&self) -> Vec<SignalType> {
        SignalType::ALL
            .into_iter()
            .filter(|signal| self.is_enabled(*signal))
            .collect()
    }

    /// Rejects timer periods that are zero, negative or not finite.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let periods = std::iter::once(("timing.tick_secs", self.timing.tick_secs))
            .chain(self.polling.all());
        for (field, secs) in periods {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(format!(
                    "{} must be a positive number of seconds, got {}",
                    field, secs
                ));
            }
        }
        Ok(())
    }
}

/// Converts fractional seconds to a chrono duration at millisecond precision.
pub(crate) fn chrono_secs(secs: f64) -> Duration {
    Duration::milliseconds((secs.max(0.0) * 1000.0).round() as i64)
}

pub(crate) fn std_secs(secs: f64) -> StdDuration {
    StdDuration::from_millis((secs.max(0.0) * 1000.0).round() as u64)
}

/// Like [`std_secs`], but never shorter than one millisecond.
pub(crate) fn period_secs(secs: f64) -> StdDuration {
    std_secs(secs).max(MIN_PERIOD)
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

/// Loads configuration, returning defaults when the file does not exist.
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => return Ok(SessionConfig::default()),
        },
    };

    if !config_path.exists() {
        return Ok(SessionConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| SessionError::Config {
        path: config_path.clone(),
        details: err.to_string(),
    })?;
    let config =
        toml::from_str::<SessionConfig>(&content).map_err(|err| SessionError::Config {
            path: config_path.clone(),
            details: err.to_string(),
        })?;
    config.validate().map_err(|details| SessionError::Config {
        path: config_path,
        details,
    })?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.enabled().len(), 5);
    }

    #[test]
    fn load_config_parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("session.toml");
        fs_err::write(
            &path,
            r#"
role = "display"
enabled_signals = ["hrv", "heart_rate"]

[timing]
remote_summary_timeout_secs = 4.5

[storage_throttle]
hrv_long_interval_secs = 12.0

[baselines]
resting_heart_rate = 58.0
"#,
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config.role, Role::Display);
        assert_eq!(
            config.enabled(),
            vec![SignalType::HeartRate, SignalType::Hrv]
        );
        assert_eq!(config.timing.remote_summary_timeout_secs, 4.5);
        assert_eq!(config.timing.countdown_steps, 3);
        assert_eq!(config.storage_throttle.hrv_long_interval_secs, 12.0);
        assert_eq!(config.storage_throttle.hrv_interval_secs, 5.0);
        assert_eq!(config.baselines.resting_heart_rate, Some(58.0));
        assert_eq!(config.baselines.hrv, None);
    }

    #[test]
    fn load_config_reports_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("session.toml");
        fs_err::write(&path, "role = 42").expect("write config");
        let err = load_config(Some(&path)).expect_err("malformed");
        assert!(matches!(err, SessionError::Config { .. }));
    }

    #[test]
    fn load_config_rejects_zero_periods() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("session.toml");

        fs_err::write(&path, "[timing]\ntick_secs = 0.0\n").expect("write config");
        match load_config(Some(&path)) {
            Err(SessionError::Config { details, .. }) => {
                assert!(details.contains("timing.tick_secs"))
            }
            other => panic!("expected config error, got {:?}", other),
        }

        fs_err::write(&path, "[polling]\nhrv_secs = -2.0\n").expect("write config");
        match load_config(Some(&path)) {
            Err(SessionError::Config { details, .. }) => {
                assert!(details.contains("polling.hrv_secs"))
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn zero_periods_are_floored() {
        let polling = PollingConfig {
            heart_rate_secs: 0.0,
            ..PollingConfig::default()
        };
        assert_eq!(polling.interval(SignalType::HeartRate), MIN_PERIOD);
        assert_eq!(period_secs(-1.0), MIN_PERIOD);
        assert_eq!(period_secs(f64::NAN), MIN_PERIOD);
        assert_eq!(period_secs(2.0), StdDuration::from_secs(2));
    }

    #[test]
    fn polling_intervals_follow_signal() {
        let polling = PollingConfig::default();
        assert_eq!(
            polling.interval(SignalType::HeartRate),
            StdDuration::from_secs(3)
        );
        assert_eq!(
            polling.interval(SignalType::Temperature),
            StdDuration::from_secs(30)
        );
    }

    #[test]
    fn fractional_seconds_convert_to_millis() {
        assert_eq!(chrono_secs(1.5), Duration::milliseconds(1500));
        assert_eq!(std_secs(-3.0), StdDuration::ZERO);
    }
}
