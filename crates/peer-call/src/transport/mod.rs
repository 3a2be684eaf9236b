//! Seams to the signaling relay, the media transport and the capture device.
//!
//! The lifecycle manager never talks to a browser, a relay server or a
//! camera directly. It drives these traits, and the embedding environment
//! supplies implementations. [`loopback`] is an in-process implementation
//! used by the binary and by tests.
//!
//! Events flow back from the transport through unbounded channels handed out
//! with each registration and each media link. The supervisor forwards them
//! into its own mailbox tagged with a generation, so late events from a
//! replaced transport are recognised and ignored.

pub mod loopback;

use crate::media::{MediaStream, MediaTrack};
use async_trait::async_trait;
use common::config::{CaptureConstraints, RelayConfig};
use common::types::{ConnectionId, Identity};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by the relay or the media transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The relay could not be reached.
    #[error("Relay unavailable: {0}")]
    Unavailable(String),

    /// Another live registration already holds this identity.
    #[error("Identity already registered: {0}")]
    IdTaken(String),

    /// The registration was closed or dropped by the relay.
    #[error("Registration closed")]
    RegistrationClosed,

    /// The media connection is no longer usable.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Swapping the outgoing video track failed.
    #[error("Track replacement failed: {0}")]
    TrackReplacement(String),

    /// Any other transport failure.
    #[error("Transport error: {0}")]
    Other(String),
}

/// Errors reported by the capture device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The user has not answered the permission prompt yet.
    #[error("Permission pending")]
    PermissionPending,

    /// The user refused access. Retried anyway; the user may change their mind.
    #[error("Permission denied")]
    PermissionDenied,

    /// The device is held by another application.
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// No device satisfies the constraints.
    #[error("No device matches the constraints")]
    NotFound,

    /// Any other capture failure.
    #[error("Capture failed: {0}")]
    Other(String),
}

impl CaptureError {
    /// Returns a bounded label string for the error variant (for metrics).
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::PermissionPending => "permission_pending",
            CaptureError::PermissionDenied => "permission_denied",
            CaptureError::DeviceBusy(_) => "device_busy",
            CaptureError::NotFound => "not_found",
            CaptureError::Other(_) => "other",
        }
    }
}

/// Events delivered on a live relay registration.
pub enum RegistrationEvent {
    /// A remote peer is calling this identity.
    IncomingCall(Box<dyn IncomingCall>),
    /// The relay connection dropped.
    Disconnected,
    /// The registration was closed by the relay.
    Closed,
    /// The relay reported an error.
    Error(String),
}

impl fmt::Debug for RegistrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationEvent::IncomingCall(call) => f
                .debug_tuple("IncomingCall")
                .field(&call.caller().as_str())
                .finish(),
            RegistrationEvent::Disconnected => f.write_str("Disconnected"),
            RegistrationEvent::Closed => f.write_str("Closed"),
            RegistrationEvent::Error(reason) => f.debug_tuple("Error").field(reason).finish(),
        }
    }
}

/// Events delivered on a media connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The remote side's media arrived.
    RemoteStream(MediaStream),
    /// The connection was closed by either side.
    Closed,
    /// The connection failed.
    Error(String),
}

/// A successful relay registration: the handle and its event feed.
pub struct Registration {
    pub handle: Arc<dyn RelayRegistration>,
    pub events: mpsc::UnboundedReceiver<RegistrationEvent>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("identity", &self.handle.identity().as_str())
            .finish_non_exhaustive()
    }
}

/// A media connection and its event feed.
pub struct MediaLink {
    pub connection: Arc<dyn MediaConnection>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl fmt::Debug for MediaLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaLink")
            .field("connection_id", &self.connection.id())
            .field("remote", &self.connection.remote().as_str())
            .finish_non_exhaustive()
    }
}

/// The signaling relay.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Register `identity` with the relay.
    ///
    /// At most one live registration per identity exists at the relay; a
    /// second attempt while one is live fails with `IdTaken`.
    async fn register(
        &self,
        identity: &Identity,
        config: &RelayConfig,
    ) -> Result<Registration, TransportError>;
}

/// A live registration with the relay.
#[async_trait]
pub trait RelayRegistration: Send + Sync {
    /// The identity this registration holds.
    fn identity(&self) -> &Identity;

    /// Whether the relay still considers this registration live.
    fn is_open(&self) -> bool;

    /// Place a media call to `remote`, sending `stream`.
    ///
    /// Success means the relay accepted the call and returned a connection
    /// object. It does not mean the remote answered: that is reported later
    /// as [`ConnectionEvent::RemoteStream`].
    async fn call(&self, remote: &Identity, stream: &MediaStream)
        -> Result<MediaLink, TransportError>;

    /// Release the registration. Idempotent.
    fn close(&self);
}

/// An inbound call waiting to be answered or rejected.
///
/// Dropping an unsettled call rejects it.
pub trait IncomingCall: Send {
    /// Identity of the calling peer.
    fn caller(&self) -> &Identity;

    /// Answer with the local stream.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionClosed` if the caller gave up first.
    fn answer(self: Box<Self>, stream: &MediaStream) -> Result<MediaLink, TransportError>;

    /// Decline the call.
    fn reject(self: Box<Self>);
}

/// An established or pending media connection.
pub trait MediaConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Identity of the peer on the other end.
    fn remote(&self) -> &Identity;

    /// Swap the outgoing video track without renegotiating.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the swap is refused.
    fn replace_video_track(&self, track: &MediaTrack) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    fn close(&self);
}

/// The local camera and microphone.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Acquire a stream satisfying `constraints`.
    ///
    /// May take arbitrarily long, for example while a permission prompt is
    /// open.
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError>;
}
