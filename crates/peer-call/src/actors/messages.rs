//! Message types for the supervisor mailbox.
//!
//! Commands come from [`CallSupervisorHandle`](super::CallSupervisorHandle)
//! and answer on a `oneshot`. Everything else is posted by tasks the
//! supervisor spawned (timers, acquisitions, registrations, placements, event
//! forwarders) and carries the generation of the component instance that
//! spawned it.

use super::call::CallState;
use super::signaling::SignalingState;
use super::supervisor::SessionBinding;
use crate::errors::CallError;
use crate::media::MediaStream;
use crate::transport::{
    CaptureError, ConnectionEvent, MediaLink, Registration, RegistrationEvent, TransportError,
};
use common::config::CaptureConstraints;
use common::types::{CallRole, Identity, StreamId};
use serde::Serialize;
use tokio::sync::oneshot;

/// Monotonically increasing instance number for components and attempts.
pub type Generation = u64;

/// Messages sent to `CallSupervisor`.
#[derive(Debug)]
pub(crate) enum SupervisorMessage {
    /// Switch the capture device.
    SwitchDevice {
        constraints: CaptureConstraints,
        /// Response channel for the switch result.
        respond_to: oneshot::Sender<Result<SwitchOutcome, CallError>>,
    },

    /// Flip between front and back camera.
    ToggleCamera {
        respond_to: oneshot::Sender<Result<SwitchOutcome, CallError>>,
    },

    /// Replace the session binding and rebuild call and signaling.
    Rebind {
        binding: SessionBinding,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Get a diagnostic snapshot.
    GetState {
        respond_to: oneshot::Sender<SupervisorState>,
    },

    /// Tear everything down and stop the actor.
    Shutdown { respond_to: oneshot::Sender<()> },

    /// Capture poll timer fired.
    CaptureTick { timer: Generation },

    /// A capture acquisition finished.
    CaptureCompleted {
        attempt: Generation,
        result: Result<MediaStream, CaptureError>,
    },

    /// Signaling recreate timer fired.
    SignalingTick { timer: Generation },

    /// A relay registration attempt finished.
    RegistrationCompleted {
        generation: Generation,
        result: Result<Registration, TransportError>,
    },

    /// An event on a live registration.
    Registration {
        generation: Generation,
        event: RegistrationEvent,
    },

    /// Placement timer fired.
    PlacementTick { timer: Generation },

    /// An outbound placement attempt finished.
    PlacementCompleted {
        attempt: Generation,
        result: Result<MediaLink, TransportError>,
    },

    /// An event on the current call's connection.
    Connection {
        generation: Generation,
        event: ConnectionEvent,
    },
}

impl SupervisorMessage {
    /// Release whatever resource an undeliverable or stale message carries.
    pub(crate) fn release(self) {
        match self {
            SupervisorMessage::CaptureCompleted {
                result: Ok(stream), ..
            } => {
                stream.stop_all();
            }
            SupervisorMessage::RegistrationCompleted {
                result: Ok(registration),
                ..
            } => registration.handle.close(),
            SupervisorMessage::Registration {
                event: RegistrationEvent::IncomingCall(incoming),
                ..
            } => incoming.reject(),
            SupervisorMessage::PlacementCompleted {
                result: Ok(link), ..
            } => link.connection.close(),
            SupervisorMessage::SwitchDevice { respond_to, .. }
            | SupervisorMessage::ToggleCamera { respond_to } => {
                let _ = respond_to.send(Err(CallError::ShuttingDown));
            }
            SupervisorMessage::Rebind { respond_to, .. } => {
                let _ = respond_to.send(Err(CallError::ShuttingDown));
            }
            _ => {}
        }
    }

    /// Bounded label for stale-callback metrics.
    pub(crate) fn source(&self) -> &'static str {
        match self {
            SupervisorMessage::CaptureTick { .. }
            | SupervisorMessage::SignalingTick { .. }
            | SupervisorMessage::PlacementTick { .. } => "timer",
            SupervisorMessage::CaptureCompleted { .. } => "capture",
            SupervisorMessage::RegistrationCompleted { .. }
            | SupervisorMessage::Registration { .. } => "signaling",
            SupervisorMessage::PlacementCompleted { .. } => "placement",
            SupervisorMessage::Connection { .. } => "connection",
            _ => "command",
        }
    }
}

/// How a device switch was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchOutcome {
    /// The outgoing video track was swapped on the live call transport.
    TrackReplaced,
    /// No call transport existed; the whole stream was replaced.
    StreamReplaced,
    /// No stream existed yet; only the acquisition constraints changed.
    ConstraintsUpdated,
}

impl SwitchOutcome {
    /// Bounded label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchOutcome::TrackReplaced => "track_replaced",
            SwitchOutcome::StreamReplaced => "stream_replaced",
            SwitchOutcome::ConstraintsUpdated => "constraints_updated",
        }
    }
}

/// Diagnostic view of the current call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub role: CallRole,
    pub state: CallState,
    pub remote: Identity,
}

/// Diagnostic snapshot of a supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorState {
    pub binding: SessionBinding,
    /// State of the current signaling session, if one exists.
    pub signaling: Option<SignalingState>,
    /// The current call, if one exists.
    pub call: Option<CallSnapshot>,
    /// Id of the current capture stream.
    pub capture_stream: Option<StreamId>,
    /// Whether the placement loop is running.
    pub placing: bool,
    pub connected: bool,
    /// Whether teardown has started.
    pub shutting_down: bool,
}
