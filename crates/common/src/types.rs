//! Common data types for Peer Call components.

use crate::error::{IdentityError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A user-facing display name.
///
/// Names are trimmed but otherwise kept verbatim, so `Alice` and `alice`
/// are different participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    /// Trim and validate a user-entered name.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::EmptyDisplayName` if nothing is left after trimming.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::EmptyDisplayName);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Generate a random name for a participant who never chose one.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DisplayName {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DisplayName> for String {
    fn from(value: DisplayName) -> Self {
        value.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A signaling identity registered with the relay: `{prefix}-{name}`.
///
/// Ordering is lexicographic on the full string and is used to break ties
/// when both participants dial each other at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Derive the signaling identity for `name` under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidPrefix` if the prefix is empty or
    /// contains whitespace.
    pub fn derive(prefix: &str, name: &DisplayName) -> Result<Self> {
        if prefix.is_empty() || prefix.chars().any(char::is_whitespace) {
            return Err(IdentityError::InvalidPrefix(prefix.to_string()));
        }
        Ok(Self(format!("{prefix}-{name}")))
    }

    /// Borrow the identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the call a participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    /// Proactively places the call and retries until connected.
    Initiator,
    /// Waits for and answers the inbound call.
    Responder,
}

impl CallRole {
    /// Bounded label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CallRole::Initiator => "initiator",
            CallRole::Responder => "responder",
        }
    }
}

/// Unique identifier for a local or remote media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    /// Create a new random stream ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a single media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub Uuid);

impl TrackId {
    /// Create a new random track ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a media connection between two peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
