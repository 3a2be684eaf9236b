//! Peer Call Library
//!
//! Connection lifecycle manager for a two-party peer-to-peer audio/video call
//! brokered by a signaling relay. It keeps three asynchronous resources alive
//! and consistent with each other:
//!
//! - a local capture stream (acquired with a single-flight retry loop, and
//!   swappable mid-call without renegotiation)
//! - a signaling registration (recreated on a fixed interval after failure)
//! - the call itself (placed with jittered retries by the Initiator, answered
//!   by the Responder)
//!
//! # Architecture
//!
//! ```text
//! CallSupervisor (actor, one per side)
//! ├── CaptureSourceManager
//! ├── SignalingSession ──► Relay / RelayRegistration (transport traits)
//! └── CallSession      ──► MediaConnection
//! ```
//!
//! Every state change happens inside the supervisor task. Timers and
//! in-flight operations report back through its mailbox tagged with a
//! generation, so late results from discarded instances are dropped and
//! their resources released.
//!
//! # Modules
//!
//! - [`actors`] - Supervisor actor and the components it owns
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types
//! - [`media`] - Local and remote media stream model
//! - [`observability`] - Metrics and health endpoints
//! - [`transport`] - Relay, media transport and capture device traits, plus
//!   the in-process loopback implementation

pub mod actors;
pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod transport;

pub use actors::{
    CallStatus, CallSupervisor, CallSupervisorHandle, SessionBinding, SessionEvent,
    SessionEventKind, StatusReceiver, SupervisorSettings, SwitchOutcome,
};
pub use errors::CallError;
