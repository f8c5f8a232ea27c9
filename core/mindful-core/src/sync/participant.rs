//! Role-specific hooks the controller calls around a session's lifecycle.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;

use super::{DeviceSyncCoordinator, HandoffOutcome, WaitResult};
use crate::config::{std_secs, TimingConfig};
use crate::session::Session;
use crate::signals::SignalHub;
use crate::types::{Role, SignalType};

#[async_trait]
pub trait LifecycleParticipant: Send + Sync {
    fn role(&self) -> Role;

    /// Called once tracking has begun.
    async fn session_started(&self, _session: &Session) {}

    /// Called between sealing and summarizing. May add or replace samples.
    async fn finish_session(&self, session: &mut Session) -> HandoffOutcome;

    /// Called after the final summary has been computed and saved.
    async fn session_finalized(&self, _session: &Session) {}
}

pub struct StandaloneParticipant;

#[async_trait]
impl LifecycleParticipant for StandaloneParticipant {
    fn role(&self) -> Role {
        Role::Standalone
    }

    async fn finish_session(&self, _session: &mut Session) -> HandoffOutcome {
        HandoffOutcome::Local
    }
}

/// Acquires signals, recovers late HRV, then ships the record to the display.
pub struct CollectorParticipant {
    coordinator: Arc<DeviceSyncCoordinator>,
    hub: Arc<SignalHub>,
    recovery_delay: StdDuration,
}

impl CollectorParticipant {
    pub fn new(
        coordinator: Arc<DeviceSyncCoordinator>,
        hub: Arc<SignalHub>,
        recovery_delay: StdDuration,
    ) -> Self {
        Self {
            coordinator,
            hub,
            recovery_delay,
        }
    }
}

#[async_trait]
impl LifecycleParticipant for CollectorParticipant {
    fn role(&self) -> Role {
        Role::Collector
    }

    async fn session_started(&self, session: &Session) {
        self.coordinator
            .announce_start(session.id(), session.start_date())
            .await;
    }

    // Some HRV readings are written shortly after acquisition ends.
    async fn finish_session(&self, session: &mut Session) -> HandoffOutcome {
        tokio::time::sleep(self.recovery_delay).await;

        let end = session.end_date().unwrap_or(session.start_date());
        let recovered = match self
            .hub
            .fetch_between(SignalType::Hrv, session.start_date(), end)
            .await
        {
            Ok(samples) => samples,
            Err(err) => {
                tracing::warn!(session_id = %session.id(), error = %err, "HRV recovery query failed");
                Vec::new()
            }
        };

        let added = session.amend_recovered(SignalType::Hrv, &recovered);
        session.metadata_mut().hrv_post_session_samples += added as u32;
        if added > 0 {
            tracing::info!(session_id = %session.id(), added, "Recovered late HRV samples");
        }
        HandoffOutcome::Recovered { hrv_samples: added }
    }

    async fn session_finalized(&self, session: &Session) {
        let end = session.end_date().unwrap_or(session.start_date());
        let package = session.to_package(end);
        if let Err(err) = self.coordinator.ship_package(&package).await {
            tracing::warn!(session_id = %session.id(), error = %err, "Failed to send package");
        }
    }
}

/// Mirrors the collector's session and waits for its package on stop.
pub struct DisplayParticipant {
    coordinator: Arc<DeviceSyncCoordinator>,
}

impl DisplayParticipant {
    pub fn new(coordinator: Arc<DeviceSyncCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl LifecycleParticipant for DisplayParticipant {
    fn role(&self) -> Role {
        Role::Display
    }

    async fn finish_session(&self, session: &mut Session) -> HandoffOutcome {
        match self.coordinator.await_package(session.id()).await {
            WaitResult::Package(package) => match session.merge_package(&package) {
                Ok(()) => {
                    tracing::info!(
                        session_id = %session.id(),
                        samples = session.total_samples(),
                        "Merged collector package"
                    );
                    HandoffOutcome::Merged
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Discarding mismatched package");
                    HandoffOutcome::TransportFailed
                }
            },
            WaitResult::Fallback(outcome) => outcome,
        }
    }
}

pub fn participant_for(
    role: Role,
    coordinator: Arc<DeviceSyncCoordinator>,
    hub: Arc<SignalHub>,
    timing: &TimingConfig,
) -> Arc<dyn LifecycleParticipant> {
    match role {
        Role::Standalone => Arc::new(StandaloneParticipant),
        Role::Collector => Arc::new(CollectorParticipant::new(
            coordinator,
            hub,
            std_secs(timing.hrv_recovery_delay_secs),
        )),
        Role::Display => Arc::new(DisplayParticipant::new(coordinator)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAuthorizer, FakeSignalSource, RecordingTransport};
    use crate::types::Sample;
    use chrono::{Duration, TimeZone, Utc};
    use mindful_protocol::RemoteMessage;

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 7, 0, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn collector_recovers_hrv_after_delay() {
        let hrv = Arc::new(FakeSignalSource::new(SignalType::Hrv));
        hrv.set_history(vec![
            Sample::new(start() + Duration::seconds(50), 44.0),
            Sample::new(start() + Duration::seconds(120), 47.0),
        ]);
        let hub = Arc::new(SignalHub::new(Arc::new(FakeAuthorizer::granted())).with_source(hrv));
        let transport = Arc::new(RecordingTransport::new());
        let coordinator = Arc::new(DeviceSyncCoordinator::new(
            Some(transport.clone()),
            StdDuration::from_secs(10),
        ));
        let collector =
            CollectorParticipant::new(coordinator, hub, StdDuration::from_secs(2));

        let mut session = Session::new(start());
        session.seal(start() + Duration::seconds(60));

        let began = tokio::time::Instant::now();
        let outcome = collector.finish_session(&mut session).await;

        assert!(began.elapsed() >= StdDuration::from_secs(2));
        assert_eq!(outcome, HandoffOutcome::Recovered { hrv_samples: 1 });
        assert_eq!(session.samples(SignalType::Hrv).len(), 1);
        assert_eq!(session.metadata().hrv_post_session_samples, 1);

        collector.session_finalized(&session).await;
        let sent = transport.sent();
        assert!(matches!(&sent[0], RemoteMessage::Package { package } if package.hrv_samples.len() == 1));
    }

    #[tokio::test]
    async fn standalone_finishes_locally() {
        let mut session = Session::new(start());
        assert_eq!(
            StandaloneParticipant.finish_session(&mut session).await,
            HandoffOutcome::Local
        );
    }
}
