//! Wire types and validation for the collector/display session handoff.
//!
//! This crate is shared by both devices to prevent schema drift. The receiving
//! side remains the authority on validation, but senders reuse the same types
//! to construct valid messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024; // 4MB
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Allowed disagreement between `duration` and `end_date - start_date`.
const DURATION_TOLERANCE_SECS: f64 = 1.0;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// One timestamped reading. The signal type is implied by the sequence it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl SampleRecord {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Complete snapshot of one session, sent once by the collector after stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPackage {
    pub session_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Seconds between `start_date` and `end_date`.
    pub duration: f64,
    #[serde(default)]
    pub heart_rate_samples: Vec<SampleRecord>,
    #[serde(default)]
    pub hrv_samples: Vec<SampleRecord>,
    #[serde(default)]
    pub respiratory_rate_samples: Vec<SampleRecord>,
    #[serde(default)]
    pub vo2_max_samples: Vec<SampleRecord>,
    #[serde(default)]
    pub temperature_samples: Vec<SampleRecord>,
}

impl SyncPackage {
    pub fn total_samples(&self) -> usize {
        self.heart_rate_samples.len()
            + self.hrv_samples.len()
            + self.respiratory_rate_samples.len()
            + self.vo2_max_samples.len()
            + self.temperature_samples.len()
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_session_id(&self.session_id)?;

        if self.end_date < self.start_date {
            return Err(ErrorInfo::new(
                "invalid_timing",
                "endDate must not precede startDate",
            ));
        }

        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(ErrorInfo::new(
                "invalid_timing",
                "duration must be a non-negative number",
            ));
        }

        let span = (self.end_date - self.start_date).num_milliseconds() as f64 / 1000.0;
        if (span - self.duration).abs() > DURATION_TOLERANCE_SECS {
            return Err(ErrorInfo::new(
                "invalid_timing",
                format!(
                    "duration {:.1}s does not match endDate - startDate ({:.1}s)",
                    self.duration, span
                ),
            ));
        }

        for (field, samples) in [
            ("heartRateSamples", &self.heart_rate_samples),
            ("hrvSamples", &self.hrv_samples),
            ("respiratoryRateSamples", &self.respiratory_rate_samples),
            ("vo2MaxSamples", &self.vo2_max_samples),
            ("temperatureSamples", &self.temperature_samples),
        ] {
            if samples.iter().any(|sample| !sample.value.is_finite()) {
                return Err(ErrorInfo::new(
                    "invalid_sample",
                    format!("{} contains a non-finite value", field),
                ));
            }
        }

        Ok(())
    }
}

/// Messages exchanged between the collector and the display device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteMessage {
    SessionStarted {
        session_id: String,
        start_date: DateTime<Utc>,
    },
    SessionEnded {
        session_id: String,
    },
    StartRequested,
    StopRequested {
        #[serde(default)]
        session_id: Option<String>,
    },
    Package {
        package: SyncPackage,
    },
}

impl RemoteMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteMessage::SessionStarted { .. } => "session_started",
            RemoteMessage::SessionEnded { .. } => "session_ended",
            RemoteMessage::StartRequested => "start_requested",
            RemoteMessage::StopRequested { .. } => "stop_requested",
            RemoteMessage::Package { .. } => "package",
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self {
            RemoteMessage::SessionStarted { session_id, .. }
            | RemoteMessage::SessionEnded { session_id } => require_session_id(session_id),
            RemoteMessage::StopRequested {
                session_id: Some(session_id),
            } => require_session_id(session_id),
            RemoteMessage::StopRequested { session_id: None } | RemoteMessage::StartRequested => {
                Ok(())
            }
            RemoteMessage::Package { package } => package.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub protocol_version: u32,
    pub message: RemoteMessage,
}

impl Envelope {
    pub fn new(message: RemoteMessage) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            message,
        }
    }
}

pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, ErrorInfo> {
    envelope.message.validate()?;
    let bytes = serde_json::to_vec(envelope).map_err(|err| {
        ErrorInfo::new(
            "serialization_error",
            format!("failed to encode message: {}", err),
        )
    })?;
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(ErrorInfo::new(
            "message_too_large",
            "message exceeded maximum size",
        ));
    }
    Ok(bytes)
}

pub fn parse_envelope(bytes: &[u8]) -> Result<Envelope, ErrorInfo> {
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(ErrorInfo::new(
            "message_too_large",
            "message exceeded maximum size",
        ));
    }
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_message", "message body was empty"));
    }

    let envelope: Envelope = serde_json::from_slice(bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("message was not valid JSON: {}", err),
        )
    })?;

    if envelope.protocol_version != PROTOCOL_VERSION {
        return Err(ErrorInfo::new(
            "protocol_mismatch",
            format!(
                "unsupported protocol version {} (expected {})",
                envelope.protocol_version, PROTOCOL_VERSION
            ),
        ));
    }

    envelope.message.validate()?;
    Ok(envelope)
}

fn require_session_id(value: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "invalid_session_id",
            "session_id is required",
        ));
    }
    if value.len() > MAX_SESSION_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_session_id",
            format!(
                "session_id must be {} characters or fewer",
                MAX_SESSION_ID_LEN
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base_package() -> SyncPackage {
        let start = Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap();
        let end = start + Duration::seconds(600);
        SyncPackage {
            session_id: "session-1".to_string(),
            start_date: start,
            end_date: end,
            duration: 600.0,
            heart_rate_samples: vec![SampleRecord::new(start + Duration::seconds(5), 72.0)],
            hrv_samples: vec![],
            respiratory_rate_samples: vec![],
            vo2_max_samples: vec![],
            temperature_samples: vec![],
        }
    }

    #[test]
    fn validates_package() {
        assert!(base_package().validate().is_ok());
    }

    #[test]
    fn rejects_end_before_start() {
        let mut package = base_package();
        package.end_date = package.start_date - Duration::seconds(1);
        let err = package.validate().unwrap_err();
        assert_eq!(err.code, "invalid_timing");
    }

    #[test]
    fn rejects_inconsistent_duration() {
        let mut package = base_package();
        package.duration = 30.0;
        assert!(package.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_sample() {
        let mut package = base_package();
        package
            .hrv_samples
            .push(SampleRecord::new(package.start_date, f64::NAN));
        let err = package.validate().unwrap_err();
        assert_eq!(err.code, "invalid_sample");
    }

    #[test]
    fn rejects_missing_session_id() {
        let message = RemoteMessage::SessionEnded {
            session_id: "  ".to_string(),
        };
        assert!(message.validate().is_err());
    }

    #[test]
    fn rejects_long_session_id() {
        let message = RemoteMessage::SessionStarted {
            session_id: "a".repeat(256),
            start_date: Utc::now(),
        };
        assert!(message.validate().is_err());
    }

    #[test]
    fn package_uses_camel_case_wire_names() {
        let value = serde_json::to_value(base_package()).expect("serialize");
        assert!(value.get("sessionId").is_some());
        assert!(value.get("heartRateSamples").is_some());
        assert!(value.get("vo2MaxSamples").is_some());
        assert!(value.get("session_id").is_none());
    }

    #[test]
    fn parses_encoded_envelope() {
        let envelope = Envelope::new(RemoteMessage::Package {
            package: base_package(),
        });
        let bytes = encode_envelope(&envelope).expect("encode");
        let parsed = parse_envelope(&bytes).expect("parse");
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn rejects_protocol_mismatch() {
        let payload = serde_json::json!({
            "protocol_version": 99,
            "message": { "type": "start_requested" }
        });
        let bytes = serde_json::to_vec(&payload).unwrap();
        let err = parse_envelope(&bytes).unwrap_err();
        assert_eq!(err.code, "protocol_mismatch");
    }

    #[test]
    fn rejects_unknown_message_type() {
        let bytes = br#"{"protocol_version":1,"message":{"type":"reboot"}}"#;
        let err = parse_envelope(bytes).unwrap_err();
        assert_eq!(err.code, "invalid_json");
    }

    #[test]
    fn rejects_empty_message() {
        let err = parse_envelope(b"  \n").unwrap_err();
        assert_eq!(err.code, "empty_message");
    }

    #[test]
    fn stop_request_session_id_is_optional() {
        let bytes = br#"{"protocol_version":1,"message":{"type":"stop_requested"}}"#;
        let parsed = parse_envelope(bytes).expect("parse");
        assert_eq!(
            parsed.message,
            RemoteMessage::StopRequested { session_id: None }
        );
    }
}
