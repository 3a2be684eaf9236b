//! Externally visible outputs of a supervisor.
//!
//! - [`StatusReceiver`]: the current [`CallStatus`] (connected flag and
//!   remote stream), published on a `watch` channel
//! - [`SessionEvent`]: raw lifecycle events on a `broadcast` channel, for
//!   logging and telemetry collaborators

use super::messages::SwitchOutcome;
use crate::errors::CallError;
use crate::media::MediaStream;
use chrono::{DateTime, Utc};
use common::types::{Identity, StreamId};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

/// Capacity of the event broadcast; slow subscribers lose the oldest events.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Whether the call is connected, and the remote media if so.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStatus {
    pub connected: bool,
    pub remote_stream: Option<MediaStream>,
}

/// Receiver side of the status channel.
#[derive(Clone)]
pub struct StatusReceiver {
    inner: watch::Receiver<CallStatus>,
}

impl StatusReceiver {
    pub(crate) fn new(inner: watch::Receiver<CallStatus>) -> Self {
        Self { inner }
    }

    /// Current status.
    #[must_use]
    pub fn current(&self) -> CallStatus {
        self.inner.borrow().clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.borrow().connected
    }

    #[must_use]
    pub fn remote_stream(&self) -> Option<MediaStream> {
        self.inner.borrow().remote_stream.clone()
    }

    /// Wait for the next change.
    ///
    /// # Errors
    ///
    /// Returns `CallError::ShuttingDown` once the supervisor is gone.
    pub async fn changed(&mut self) -> Result<CallStatus, CallError> {
        self.inner
            .changed()
            .await
            .map_err(|_| CallError::ShuttingDown)?;
        Ok(self.inner.borrow_and_update().clone())
    }

    /// Wait until `predicate` holds, checking the current value first.
    ///
    /// # Errors
    ///
    /// Returns `CallError::ShuttingDown` if the supervisor stops first.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&CallStatus) -> bool,
    ) -> Result<CallStatus, CallError> {
        let status = self
            .inner
            .wait_for(predicate)
            .await
            .map_err(|_| CallError::ShuttingDown)?;
        Ok(status.clone())
    }

    /// Wait until the call is connected.
    ///
    /// # Errors
    ///
    /// Returns `CallError::ShuttingDown` if the supervisor stops first.
    pub async fn wait_connected(&mut self) -> Result<CallStatus, CallError> {
        self.wait_for(|status| status.connected).await
    }
}

/// A raw lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub occurred_at: DateTime<Utc>,
    /// Local identity of the supervisor that emitted the event.
    pub identity: Identity,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    CaptureAcquired { stream_id: StreamId },
    CaptureFailed { reason: String },
    SignalingOpened,
    SignalingFailed { reason: String },
    SignalingRecreated,
    PlacementFailed { reason: String },
    CallPlacing { remote: Identity },
    CallAnswered { remote: Identity },
    CallConnected { remote: Identity },
    CallClosed { remote: Identity, reason: String },
    IncomingRejected { caller: Identity, reason: String },
    DeviceSwitched { outcome: SwitchOutcome },
    DeviceSwitchFailed { reason: String },
    Rebound { local: Identity, remote: Identity },
    Stopped,
}

/// Sending half of the event broadcast, stamping each event.
#[derive(Clone)]
pub(crate) struct EventPublisher {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventPublisher {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish; having no subscribers is fine.
    pub(crate) fn publish(&self, identity: &Identity, kind: SessionEventKind) {
        let _ = self.sender.send(SessionEvent {
            occurred_at: Utc::now(),
            identity: identity.clone(),
            kind,
        });
    }
}
