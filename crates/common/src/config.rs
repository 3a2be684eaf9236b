//! Common configuration types for Peer Call components.
//!
//! These are passed through to the relay and capture backends untouched;
//! nothing in the lifecycle manager interprets ICE servers or resolution
//! ranges beyond toggling the facing mode.

use crate::secret::SecretString;
use serde::{Deserialize, Serialize};

/// Public STUN server used when no other is configured.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Signaling relay connection parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Relay host name
    pub host: String,
    /// Relay port
    pub port: u16,
    /// Whether to use TLS towards the relay
    pub secure: bool,
    /// STUN/TURN servers handed to the media transport
    #[serde(default, rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

/// A STUN or TURN server entry.
///
/// STUN entries carry only a URL; TURN entries carry a username and
/// credential as well.
#[derive(Debug, Clone, Deserialize)]
pub struct IceServer {
    /// Server URL (`stun:` or `turn:` scheme)
    pub url: String,
    /// TURN username
    #[serde(default)]
    pub username: Option<String>,
    /// TURN credential (never logged)
    #[serde(default)]
    pub credential: Option<SecretString>,
}

impl IceServer {
    /// A credential-less STUN entry.
    #[must_use]
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    /// A TURN entry with credentials.
    #[must_use]
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: SecretString,
    ) -> Self {
        Self {
            url: url.into(),
            username: Some(username.into()),
            credential: Some(credential),
        }
    }
}

/// Camera selection on devices with more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera
    User,
    /// Back camera
    Environment,
}

impl FacingMode {
    /// The other camera.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }

    /// Bounded label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FacingMode::User => "user",
            FacingMode::Environment => "environment",
        }
    }
}

/// A `{min, ideal, max}` constraint range; absent bounds are unconstrained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstrainRange {
    /// Lowest acceptable value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Preferred value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ideal: Option<f64>,
    /// Highest acceptable value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ConstrainRange {
    /// Range with all three bounds set.
    #[must_use]
    pub fn bounded(min: f64, ideal: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            ideal: Some(ideal),
            max: Some(max),
        }
    }

    /// Range with only a preferred value.
    #[must_use]
    pub fn ideal(ideal: f64) -> Self {
        Self {
            ideal: Some(ideal),
            ..Self::default()
        }
    }
}

/// Video capture constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    /// Frame width in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<ConstrainRange>,
    /// Frame height in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<ConstrainRange>,
    /// Frames per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<ConstrainRange>,
    /// Which camera to use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing_mode: Option<FacingMode>,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: Some(ConstrainRange::bounded(1280.0, 1920.0, 2560.0)),
            height: Some(ConstrainRange::bounded(720.0, 1080.0, 1440.0)),
            frame_rate: Some(ConstrainRange::ideal(60.0)),
            facing_mode: Some(FacingMode::User),
        }
    }
}

/// Constraints for acquiring the local capture stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    /// Video constraints; `None` disables video
    #[serde(default)]
    pub video: Option<VideoConstraints>,
    /// Whether to capture audio
    #[serde(default)]
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            video: Some(VideoConstraints::default()),
            audio: true,
        }
    }
}

impl CaptureConstraints {
    /// Requested facing mode, if any.
    #[must_use]
    pub fn facing_mode(&self) -> Option<FacingMode> {
        self.video.as_ref().and_then(|v| v.facing_mode)
    }

    /// Same constraints with the other camera selected.
    ///
    /// Video constraints without a facing mode are treated as `user`.
    #[must_use]
    pub fn with_toggled_camera(&self) -> Self {
        let mut next = self.clone();
        let video = next.video.get_or_insert_with(VideoConstraints::default);
        video.facing_mode = Some(video.facing_mode.unwrap_or(FacingMode::User).toggled());
        next
    }
}
