//! # Peer Call Test Utilities
//!
//! Shared test utilities for Peer Call.
//!
//! ## Modules
//!
//! - `mock_capture` - Capture devices with scripted failures, delays and gates
//! - `fixtures` - Identities, bindings, relay configuration and settings
//! - `assertions` - Waiting for events, status and state with timeouts
//!
//! The in-process relay lives in `peer_call::transport::loopback` because
//! the binary uses it too.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pc_test_utils::{binding, settings, ScriptedCapture};
//!
//! let (handle, task) = CallSupervisor::spawn(
//!     binding("alice", "bob", CallRole::Initiator),
//!     settings(),
//!     Arc::new(LoopbackRelay::new()),
//!     Arc::new(ScriptedCapture::new()),
//!     &CancellationToken::new(),
//! );
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_capture;

pub use assertions::*;
pub use fixtures::*;
pub use mock_capture::{GatedCapture, ScriptedCapture};
