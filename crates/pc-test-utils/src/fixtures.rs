//! Pre-configured test data for Peer Call tests.
//!
//! Provides:
//! - Identities under the default prefix
//! - A relay configuration pointing nowhere real
//! - Supervisor settings with short, deterministic timing

use common::config::{CaptureConstraints, IceServer, RelayConfig, DEFAULT_STUN_URL};
use common::identity::DEFAULT_IDENTITY_PREFIX;
use common::types::{CallRole, DisplayName, Identity};
use peer_call::actors::{SessionBinding, SupervisorSettings};
use peer_call::config::RetryTiming;
use std::time::Duration;

/// Identity for display name `name` under the default prefix.
#[must_use]
pub fn identity(name: &str) -> Identity {
    let name = DisplayName::parse(name).unwrap();
    Identity::derive(DEFAULT_IDENTITY_PREFIX, &name).unwrap()
}

/// Binding of `local` calling (or awaiting) `remote`.
#[must_use]
pub fn binding(local: &str, remote: &str, role: CallRole) -> SessionBinding {
    SessionBinding::new(identity(local), identity(remote), role).unwrap()
}

#[must_use]
pub fn relay_config() -> RelayConfig {
    RelayConfig {
        host: "relay.test".to_string(),
        port: 443,
        secure: true,
        ice_servers: vec![IceServer::stun(DEFAULT_STUN_URL)],
    }
}

/// Settings with the default one-second intervals and the given jitter bound.
#[must_use]
pub fn settings_with_jitter(jitter: Duration) -> SupervisorSettings {
    SupervisorSettings {
        relay: relay_config(),
        constraints: CaptureConstraints::default(),
        timing: RetryTiming {
            placement_jitter_max: jitter,
            ..RetryTiming::default()
        },
    }
}

/// Settings with the default one-second intervals and no placement jitter.
#[must_use]
pub fn settings() -> SupervisorSettings {
    settings_with_jitter(Duration::ZERO)
}
