//! Secret types for relay and TURN credentials.
//!
//! Re-exports [`secrecy`] so every crate in the workspace uses the same
//! wrapper. `SecretString` redacts itself in `Debug`, so config structs that
//! derive `Debug` never print a TURN credential, and it zeroizes on drop.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let credential = SecretString::from("turn-password");
//! assert!(format!("{credential:?}").contains("REDACTED"));
//! assert_eq!(credential.expose_secret(), "turn-password");
//! ```
//!
//! Deserialization is supported (the `serde` feature of `secrecy`), which is
//! what lets [`crate::config::IceServer`] be loaded from JSON.

pub use secrecy::{ExposeSecret, SecretString};
