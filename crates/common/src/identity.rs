//! Identity resolution and call route encoding.
//!
//! The lobby stores a display name between sessions and shares a single
//! route segment with the other participant. This module turns those inputs
//! into signaling identities:
//!
//! - [`resolve_display_name`] reuses a stored name or generates one
//! - [`CallRoute`] packs `(host, guest)` into one URL path segment
//!
//! The host is the participant who shared the link and waits for the call;
//! the guest opened it and places the call.

use crate::error::{IdentityError, Result};
use crate::types::{CallRole, DisplayName};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Default namespace prefix for signaling identities.
pub const DEFAULT_IDENTITY_PREFIX: &str = "peer-chat";

/// Separator between the two encoded names in a route segment.
const ROUTE_SEPARATOR: char = '.';

/// How a display name was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The stored name was valid and reused.
    Stored,
    /// No usable name was stored; a new one was generated and should be persisted.
    Generated,
}

/// Resolve the local display name from whatever the collaborator stored.
///
/// A missing or blank stored value is replaced by a generated name.
#[must_use]
pub fn resolve_display_name(stored: Option<&str>) -> (DisplayName, Resolution) {
    match stored.map(DisplayName::parse) {
        Some(Ok(name)) => (name, Resolution::Stored),
        _ => (DisplayName::generate(), Resolution::Generated),
    }
}

/// The two participants of a call, as carried in the call URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRoute {
    host: DisplayName,
    guest: DisplayName,
}

impl CallRoute {
    /// Build a route between two distinct participants.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::SelfCall` when host and guest are the same name.
    pub fn new(host: DisplayName, guest: DisplayName) -> Result<Self> {
        if host == guest {
            return Err(IdentityError::SelfCall);
        }
        Ok(Self { host, guest })
    }

    /// The participant who shared the link.
    #[must_use]
    pub fn host(&self) -> &DisplayName {
        &self.host
    }

    /// The participant who opened the link.
    #[must_use]
    pub fn guest(&self) -> &DisplayName {
        &self.guest
    }

    /// Encode as a single path segment.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{}{ROUTE_SEPARATOR}{}",
            URL_SAFE_NO_PAD.encode(self.host.as_str()),
            URL_SAFE_NO_PAD.encode(self.guest.as_str())
        )
    }

    /// Decode a path segment produced by [`CallRoute::encode`].
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::MalformedRoute` for anything that is not two
    /// base64 names, and `IdentityError::SelfCall` if both names match.
    pub fn decode(segment: &str) -> Result<Self> {
        let (host, guest) = segment
            .split_once(ROUTE_SEPARATOR)
            .ok_or_else(|| IdentityError::MalformedRoute("missing separator".to_string()))?;

        Self::new(decode_name(host)?, decode_name(guest)?)
    }

    /// Role of `local` in this call, and the name of the other side.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::NotAParticipant` if `local` is neither side.
    pub fn role_for(&self, local: &DisplayName) -> Result<(CallRole, &DisplayName)> {
        if *local == self.host {
            Ok((CallRole::Responder, &self.guest))
        } else if *local == self.guest {
            Ok((CallRole::Initiator, &self.host))
        } else {
            Err(IdentityError::NotAParticipant(local.to_string()))
        }
    }
}

fn decode_name(encoded: &str) -> Result<DisplayName> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| IdentityError::MalformedRoute(e.to_string()))?;
    let raw = String::from_utf8(bytes).map_err(|e| IdentityError::MalformedRoute(e.to_string()))?;
    DisplayName::parse(&raw)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn name(raw: &str) -> DisplayName {
        DisplayName::parse(raw).unwrap()
    }

    #[test]
    fn test_resolve_reuses_stored_name() {
        let (resolved, how) = resolve_display_name(Some(" Alice "));
        assert_eq!(resolved.as_str(), "Alice");
        assert_eq!(how, Resolution::Stored);
    }

    #[test]
    fn test_resolve_generates_when_missing_or_blank() {
        let (_, how) = resolve_display_name(None);
        assert_eq!(how, Resolution::Generated);

        let (generated, how) = resolve_display_name(Some("  "));
        assert_eq!(how, Resolution::Generated);
        assert!(!generated.as_str().is_empty());
    }

    #[test]
    fn test_route_is_single_segment() {
        let route = CallRoute::new(name("anna/maria"), name("bob smith")).unwrap();
        let segment = route.encode();

        assert!(!segment.contains('/'));
        assert!(!segment.contains(' '));
        assert_eq!(CallRoute::decode(&segment).unwrap(), route);
    }

    #[test]
    fn test_route_rejects_self_call() {
        assert_eq!(
            CallRoute::new(name("alice"), name(" alice")),
            Err(IdentityError::SelfCall)
        );
    }

    #[test]
    fn test_names_differing_in_case_are_distinct() {
        let route = CallRoute::new(name("Alice"), name("alice")).unwrap();
        assert_ne!(route.host(), route.guest());
    }

    #[test]
    fn test_route_decode_rejects_garbage() {
        assert!(matches!(
            CallRoute::decode("no-separator"),
            Err(IdentityError::MalformedRoute(_))
        ));
        assert!(matches!(
            CallRoute::decode("!!!.???"),
            Err(IdentityError::MalformedRoute(_))
        ));
    }

    #[test]
    fn test_role_for_each_side() {
        let route = CallRoute::new(name("host"), name("guest")).unwrap();

        let (role, other) = route.role_for(&name("host")).unwrap();
        assert_eq!(role, CallRole::Responder);
        assert_eq!(other.as_str(), "guest");

        let (role, other) = route.role_for(&name("guest")).unwrap();
        assert_eq!(role, CallRole::Initiator);
        assert_eq!(other.as_str(), "host");

        assert!(matches!(
            route.role_for(&name("mallory")),
            Err(IdentityError::NotAParticipant(_))
        ));
    }
}
