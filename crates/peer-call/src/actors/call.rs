//! Call session: one logical call with the bound remote identity.
//!
//! An Initiator session starts in `Placing` once the relay acknowledged the
//! outbound call; a Responder session starts in `Idle` once the inbound call
//! was answered. Either becomes `Connected` when remote media arrives and
//! ends in `Closed`. A closed session is discarded, never reused.
//!
//! The placement retry loop itself lives in the supervisor, which owns the
//! preconditions (signaling open, stream present, no current call).

use super::messages::{CallSnapshot, Generation, SupervisorMessage};
use super::tasks::spawn_forwarder;
use crate::media::MediaStream;
use crate::transport::{MediaConnection, MediaLink};
use common::types::{CallRole, Identity};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lifecycle of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Placing,
    Connected,
    Closed,
}

pub struct CallSession {
    generation: Generation,
    remote: Identity,
    role: CallRole,
    state: CallState,
    connection: Arc<dyn MediaConnection>,
    remote_stream: Option<MediaStream>,
    created_at: Instant,
    /// Stops the connection event forwarder.
    cancel: CancellationToken,
}

impl CallSession {
    /// Wrap an acknowledged outbound call (Initiator).
    pub(crate) fn placed(
        generation: Generation,
        link: MediaLink,
        parent: &CancellationToken,
        sender: mpsc::Sender<SupervisorMessage>,
    ) -> Self {
        Self::new(generation, CallRole::Initiator, CallState::Placing, link, parent, sender)
    }

    /// Wrap an answered inbound call (Responder).
    pub(crate) fn answered(
        generation: Generation,
        link: MediaLink,
        parent: &CancellationToken,
        sender: mpsc::Sender<SupervisorMessage>,
    ) -> Self {
        Self::new(generation, CallRole::Responder, CallState::Idle, link, parent, sender)
    }

    fn new(
        generation: Generation,
        role: CallRole,
        state: CallState,
        link: MediaLink,
        parent: &CancellationToken,
        sender: mpsc::Sender<SupervisorMessage>,
    ) -> Self {
        let cancel = parent.child_token();
        spawn_forwarder(link.events, cancel.clone(), sender, move |event| {
            SupervisorMessage::Connection { generation, event }
        });

        let remote = link.connection.remote().clone();
        debug!(
            target: "pc.call",
            connection_id = %link.connection.id(),
            remote = %remote,
            role = role.as_str(),
            generation,
            "Call session created"
        );

        Self {
            generation,
            remote,
            role,
            state,
            connection: link.connection,
            remote_stream: None,
            created_at: Instant::now(),
            cancel,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn remote(&self) -> &Identity {
        &self.remote
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == CallState::Connected
    }

    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.remote_stream.as_ref()
    }

    /// The transport, while the call is not closed.
    pub(crate) fn connection(&self) -> Option<&Arc<dyn MediaConnection>> {
        (self.state != CallState::Closed).then_some(&self.connection)
    }

    pub(crate) fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            role: self.role,
            state: self.state,
            remote: self.remote.clone(),
        }
    }

    /// Remote media arrived. Returns the setup time if this connected the call.
    pub(crate) fn on_remote_stream(&mut self, stream: MediaStream) -> Option<std::time::Duration> {
        if self.state == CallState::Closed {
            return None;
        }
        let newly_connected = self.state != CallState::Connected;
        self.remote_stream = Some(stream);
        self.state = CallState::Connected;

        if newly_connected {
            let setup = self.created_at.elapsed();
            info!(
                target: "pc.call",
                remote = %self.remote,
                role = self.role.as_str(),
                setup_ms = u64::try_from(setup.as_millis()).unwrap_or(u64::MAX),
                "Call connected"
            );
            Some(setup)
        } else {
            None
        }
    }

    /// Close the transport and clear the remote stream. Idempotent.
    pub(crate) fn close(&mut self, reason: &str) {
        if self.state == CallState::Closed {
            return;
        }
        info!(
            target: "pc.call",
            remote = %self.remote,
            role = self.role.as_str(),
            reason,
            "Call closed"
        );
        self.state = CallState::Closed;
        self.remote_stream = None;
        self.cancel.cancel();
        self.connection.close();
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.close("dropped");
    }
}
