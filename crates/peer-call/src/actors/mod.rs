//! Actor model implementation of the call lifecycle.
//!
//! ```text
//! CallSupervisor (one per side of a call)
//! ├── CaptureSourceManager   single-flight acquisition + device switch
//! ├── SignalingSession       one relay registration, recreated on failure
//! └── CallSession            one call with the bound remote identity
//! ```
//!
//! Only the supervisor task mutates state. The components it owns spawn
//! helper tasks for slow operations, and those report back through the
//! supervisor mailbox tagged with a [`Generation`] so that results from
//! discarded instances are recognised and released.
//!
//! # Modules
//!
//! - [`supervisor`] - `CallSupervisor` actor and its handle
//! - [`capture`] - capture source manager
//! - [`signaling`] - signaling session
//! - [`call`] - call session
//! - [`messages`] - mailbox message types and snapshots
//! - [`status`] - status watch and lifecycle event broadcast

pub mod call;
pub mod capture;
pub mod messages;
pub mod signaling;
pub mod status;
pub mod supervisor;
pub(crate) mod tasks;

// Re-export primary types
pub use call::{CallSession, CallState};
pub use capture::CaptureSourceManager;
pub use messages::{CallSnapshot, Generation, SupervisorState, SwitchOutcome};
pub use signaling::{SignalingSession, SignalingState};
pub use status::{CallStatus, SessionEvent, SessionEventKind, StatusReceiver};
pub use supervisor::{CallSupervisor, CallSupervisorHandle, SessionBinding, SupervisorSettings};
