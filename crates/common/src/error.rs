//! Common error types for Peer Call components.

use thiserror::Error;

/// Errors raised while resolving names, identities and call routes.
///
/// Every variant is an input problem: none of them is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Display name is empty after trimming.
    #[error("Display name is empty")]
    EmptyDisplayName,

    /// Identity prefix is empty or contains whitespace.
    #[error("Invalid identity prefix: {0:?}")]
    InvalidPrefix(String),

    /// Call route segment could not be decoded.
    #[error("Malformed call route: {0}")]
    MalformedRoute(String),

    /// Both sides of the call resolve to the same participant.
    #[error("Cannot call yourself")]
    SelfCall,

    /// The local participant is neither host nor guest of the route.
    #[error("Participant {0:?} is not part of this call")]
    NotAParticipant(String),
}

/// Result type alias using `IdentityError`
pub type Result<T> = std::result::Result<T, IdentityError>;
