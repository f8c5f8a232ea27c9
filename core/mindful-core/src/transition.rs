//! Maps controller events to lifecycle phase changes.
//! `None` means the event is not valid in the current phase.

use crate::types::SessionPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    StartRequested,
    CountdownFinished,
    Authorized,
    AuthorizationFailed,
    /// Display role: the collector announced a session.
    RemoteStarted,
    /// Stop requested before tracking began.
    Cancelled,
    StopRequested,
    AwaitRemote,
    Summarized,
    /// A recent stored summary was restored at launch.
    Restored,
    Dismissed,
}

pub fn next_phase(current: SessionPhase, event: PhaseEvent) -> Option<SessionPhase> {
    use PhaseEvent as E;
    use SessionPhase as P;

    match (current, event) {
        (P::Idle, E::StartRequested) => Some(P::Countdown),
        (P::Countdown, E::CountdownFinished) => Some(P::Authorizing),
        (P::Authorizing, E::Authorized) => Some(P::Tracking),
        (P::Authorizing, E::AuthorizationFailed) => Some(P::Idle),
        (P::Idle | P::Countdown, E::RemoteStarted) => Some(P::Tracking),
        (P::Countdown | P::Authorizing, E::Cancelled) => Some(P::Idle),
        (P::Tracking, E::StopRequested) => Some(P::Stopping),
        (P::Stopping, E::AwaitRemote) => Some(P::AwaitingRemoteSummary),
        (P::Stopping | P::AwaitingRemoteSummary, E::Summarized) => Some(P::Summarized),
        (P::Idle, E::Restored) => Some(P::Summarized),
        (P::Summarized, E::Dismissed) => Some(P::Idle),
        _ => None,
    }
}
