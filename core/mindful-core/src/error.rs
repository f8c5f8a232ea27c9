//! Error types for mindful-core operations.
//!
//! Only [`SessionError::Authorization`] is ever surfaced to the user at session
//! start. Everything below the session level is logged and absorbed.

use std::path::PathBuf;

use crate::types::{Mechanism, SessionPhase, SignalType};

// ═══════════════════════════════════════════════════════════════════════════════
// Collaborator Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure to obtain sensor access. Fatal to session start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationError {
    #[error("Sensor data is not available on this device")]
    NotAvailable,

    #[error("Sensor authorization was denied")]
    Denied,

    #[error("Sensor authorization failed: {0}")]
    Other(String),
}

impl AuthorizationError {
    /// Text shown verbatim to the user when a session cannot start.
    pub fn user_message(&self) -> String {
        match self {
            AuthorizationError::NotAvailable => {
                "Health data is not available on this device".to_string()
            }
            AuthorizationError::Denied => {
                "Health data permission denied. Enable access in Settings to track sessions"
                    .to_string()
            }
            AuthorizationError::Other(details) => format!("Health data error: {}", details),
        }
    }
}

/// Failure to start one acquisition mechanism for one signal. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    #[error("{signal} {mechanism} acquisition unavailable: {reason}")]
    Unavailable {
        signal: SignalType,
        mechanism: Mechanism,
        reason: String,
    },

    #[error("{signal} query failed: {reason}")]
    QueryFailed { signal: SignalType, reason: String },
}

/// Cross-device transport failures. Trigger the local fallback summary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Remote device is unreachable")]
    Unreachable,

    #[error("Remote request failed: {0}")]
    RequestFailed(String),

    #[error("Package send failed: {0}")]
    SendFailed(String),

    #[error("Message encoding failed: {0}")]
    Encoding(String),
}

/// Persistence collaborator failures. Logged; never block the summary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Home directory not found, no default store path")]
    NoPath,

    #[error("Unsupported session store version {0}")]
    UnsupportedVersion(u32),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Session Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Authorization failed: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("A session is already active: {session_id}")]
    AlreadyActive { session_id: String },

    #[error("Cannot {action} while {phase}")]
    InvalidTransition {
        phase: SessionPhase,
        action: &'static str,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Collaborator Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Sync transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    Config { path: PathBuf, details: String },
}

/// Convenience type alias for Results using SessionError.
pub type Result<T> = std::result::Result<T, SessionError>;

impl From<SessionError> for String {
    fn from(err: SessionError) -> String {
        err.to_string()
    }
}
