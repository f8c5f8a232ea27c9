//! Mindful Core
//!
//! Session engine for biometric meditation tracking. It turns redundant,
//! noisy sensor callbacks into a bounded session record, watches for silent
//! sensors, and produces a summary when the session stops.
//!
//! Three roles share the same engine:
//!
//! - **Standalone**: acquires signals and summarizes locally.
//! - **Collector**: acquires signals, recovers late HRV after stopping, and
//!   ships the finished record to a paired display device.
//! - **Display**: mirrors the collector's session and, on stop, waits a
//!   bounded time for the collector's package before falling back to its
//!   own record.
//!
//! ## Architecture
//!
//! ```text
//! SignalSource (push / poll / seed) ──► ReadingSink ──► mpsc ──► pump
//!                                                                  │
//!                                  SessionController ◄─────────────┘
//!                                  ├── SampleIngestor  (storage + display throttles)
//!                                  ├── StalenessMonitor (1 Hz liveness)
//!                                  ├── SessionStore    (JSON history)
//!                                  └── LifecycleParticipant ──► DeviceSyncCoordinator ──► SyncTransport
//! ```
//!
//! Collaborators are injected through [`ControllerParts`], so every boundary
//! (sensors, authorization, clock, storage, device link) can be replaced in
//! tests.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod ingest;
pub mod session;
pub mod signals;
pub mod staleness;
pub mod storage;
pub mod summary;
pub mod sync;
pub mod transition;
pub mod types;
pub mod zones;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;


pub use clock::{Clock, SystemClock};
pub use config::{load_config, SessionConfig};
pub use controller::{ControllerParts, LiveSnapshot, SessionController, SessionEvent};
pub use error::{
    AcquisitionError, AuthorizationError, Result, SessionError, StoreError, TransportError,
};
pub use ingest::{IngestOutcome, LiveReading, SampleIngestor};
pub use session::{Session, SessionMetadata};
pub use signals::{Authorizer, PeriodicTask, ReadingSink, SignalHub, SignalSource};
pub use staleness::{LivenessReport, StalenessMonitor};
pub use storage::{InMemorySessionStore, JsonSessionStore, SessionStore};
pub use summary::{summarize, SessionSummary, Trend};
pub use sync::{DeviceSyncCoordinator, HandoffOutcome, LoopbackPair, SyncTransport};
pub use types::{Baselines, Mechanism, Reading, Role, Sample, SessionPhase, SignalType, Zone};
