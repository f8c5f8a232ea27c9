//! In-process device link.
//!
//! Every message goes through the real wire encoding, so a pair of
//! controllers talking over loopback exercises the same validation a
//! networked link would. Delivery is fire-and-forget into the peer's inbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mindful_protocol::{encode_envelope, Envelope, RemoteMessage, SyncPackage};
use tokio::sync::mpsc;

use super::SyncTransport;
use crate::error::TransportError;

/// Encoded envelopes waiting for the receiving controller.
pub type Inbox = mpsc::UnboundedReceiver<Vec<u8>>;

pub struct LoopbackTransport {
    peer: mpsc::UnboundedSender<Vec<u8>>,
    reachable: Arc<AtomicBool>,
}

impl LoopbackTransport {
    fn post(
        &self,
        message: RemoteMessage,
        on_failure: fn(String) -> TransportError,
    ) -> Result<(), TransportError> {
        if !self.is_reachable() {
            return Err(TransportError::Unreachable);
        }
        let kind = message.kind();
        let bytes = encode_envelope(&Envelope::new(message))
            .map_err(|err| TransportError::Encoding(err.to_string()))?;
        self.peer
            .send(bytes)
            .map_err(|_| on_failure(format!("{} not delivered: peer inbox closed", kind)))?;
        tracing::trace!(kind, "Posted message to peer");
        Ok(())
    }
}

#[async_trait]
impl SyncTransport for LoopbackTransport {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst) && !self.peer.is_closed()
    }

    async fn notify_session_started(
        &self,
        session_id: &str,
        start_date: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        self.post(
            RemoteMessage::SessionStarted {
                session_id: session_id.to_string(),
                start_date,
            },
            TransportError::RequestFailed,
        )
    }

    async fn notify_session_ended(&self, session_id: &str) -> Result<(), TransportError> {
        self.post(
            RemoteMessage::SessionEnded {
                session_id: session_id.to_string(),
            },
            TransportError::RequestFailed,
        )
    }

    async fn request_remote_start(&self) -> Result<(), TransportError> {
        self.post(RemoteMessage::StartRequested, TransportError::RequestFailed)
    }

    async fn request_remote_stop(&self, session_id: Option<&str>) -> Result<(), TransportError> {
        self.post(
            RemoteMessage::StopRequested {
                session_id: session_id.map(str::to_string),
            },
            TransportError::RequestFailed,
        )
    }

    async fn send_package(&self, package: &SyncPackage) -> Result<(), TransportError> {
        self.post(
            RemoteMessage::Package {
                package: package.clone(),
            },
            TransportError::SendFailed,
        )
    }
}

/// Two connected endpoints plus the inbox each side reads from.
pub struct LoopbackPair {
    pub collector: Arc<LoopbackTransport>,
    pub collector_inbox: Inbox,
    pub display: Arc<LoopbackTransport>,
    pub display_inbox: Inbox,
    reachable: Arc<AtomicBool>,
}

impl LoopbackPair {
    pub fn new() -> Self {
        let reachable = Arc::new(AtomicBool::new(true));
        let (to_collector, collector_inbox) = mpsc::unbounded_channel();
        let (to_display, display_inbox) = mpsc::unbounded_channel();

        LoopbackPair {
            collector: Arc::new(LoopbackTransport {
                peer: to_display,
                reachable: reachable.clone(),
            }),
            collector_inbox,
            display: Arc::new(LoopbackTransport {
                peer: to_collector,
                reachable: reachable.clone(),
            }),
            display_inbox,
            reachable,
        }
    }

    /// Simulates the devices moving in or out of range.
    pub fn reachability(&self) -> Arc<AtomicBool> {
        self.reachable.clone()
    }
}

impl Default for LoopbackPair {
    fn default() -> Self {
        Self::new()
    }
}
