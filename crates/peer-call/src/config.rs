//! Peer Call configuration.
//!
//! Configuration is loaded from environment variables. The TURN credential
//! is held as a `SecretString` and is redacted in Debug output.

use common::config::{CaptureConstraints, IceServer, RelayConfig, DEFAULT_STUN_URL};
use common::identity::DEFAULT_IDENTITY_PREFIX;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default relay port.
pub const DEFAULT_RELAY_PORT: u16 = 443;

/// Default TURN port.
pub const DEFAULT_TURN_PORT: u16 = 3478;

/// Default interval for every retry loop, in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

/// Default upper bound of the randomized delay before the first placement.
pub const DEFAULT_PLACEMENT_JITTER_MS: u64 = 1000;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Intervals driving the retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTiming {
    /// Delay between signaling recreation attempts.
    pub signaling_retry: Duration,
    /// Delay between capture acquisition attempts.
    pub capture_retry: Duration,
    /// Delay between call placement attempts.
    pub placement_retry: Duration,
    /// Upper bound of the uniform random delay before the first placement.
    pub placement_jitter_max: Duration,
}

impl Default for RetryTiming {
    fn default() -> Self {
        Self {
            signaling_retry: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            capture_retry: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            placement_retry: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            placement_jitter_max: Duration::from_millis(DEFAULT_PLACEMENT_JITTER_MS),
        }
    }
}

/// Peer Call configuration.
#[derive(Clone)]
pub struct Config {
    /// Namespace prefix for signaling identities (default: "peer-chat").
    pub identity_prefix: String,

    /// Stored local display name; a name is generated when absent.
    pub local_name: Option<String>,

    /// Display name of the participant to call.
    pub remote_name: String,

    /// Relay connection parameters, including ICE servers.
    pub relay: RelayConfig,

    /// Retry intervals.
    pub timing: RetryTiming,

    /// Initial capture constraints.
    pub capture: CaptureConstraints,

    /// Health endpoint bind address (default: "0.0.0.0:8090").
    pub health_bind_address: String,

    /// Flip the guest camera on this period (binary demo only).
    pub toggle_camera_every: Option<Duration>,
}

/// Custom Debug implementation that redacts the TURN credential.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ice_urls: Vec<&str> = self.relay.ice_servers.iter().map(|s| s.url.as_str()).collect();
        f.debug_struct("Config")
            .field("identity_prefix", &self.identity_prefix)
            .field("local_name", &self.local_name)
            .field("remote_name", &self.remote_name)
            .field("relay_host", &self.relay.host)
            .field("relay_port", &self.relay.port)
            .field("relay_secure", &self.relay.secure)
            .field("ice_servers", &ice_urls)
            .field("turn_credential", &"[REDACTED]")
            .field("timing", &self.timing)
            .field("health_bind_address", &self.health_bind_address)
            .field("toggle_camera_every", &self.toggle_camera_every)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let remote_name = required(vars, "PC_REMOTE_NAME")?;
        let relay_host = required(vars, "PC_RELAY_HOST")?;

        let identity_prefix = vars
            .get("PC_IDENTITY_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_IDENTITY_PREFIX.to_string());

        let local_name = vars
            .get("PC_LOCAL_NAME")
            .filter(|s| !s.trim().is_empty())
            .cloned();

        let relay_port = parse_or(vars, "PC_RELAY_PORT", DEFAULT_RELAY_PORT)?;
        let relay_secure = parse_or(vars, "PC_RELAY_SECURE", true)?;

        let stun_url = vars
            .get("PC_STUN_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_STUN_URL.to_string());
        let mut ice_servers = vec![IceServer::stun(stun_url)];
        if let Some(turn) = turn_server(vars)? {
            ice_servers.push(turn);
        }

        let timing = RetryTiming {
            signaling_retry: interval(vars, "PC_SIGNALING_RETRY_MS")?,
            capture_retry: interval(vars, "PC_CAPTURE_RETRY_MS")?,
            placement_retry: interval(vars, "PC_PLACEMENT_RETRY_MS")?,
            placement_jitter_max: Duration::from_millis(parse_or(
                vars,
                "PC_PLACEMENT_JITTER_MS",
                DEFAULT_PLACEMENT_JITTER_MS,
            )?),
        };

        let health_bind_address = vars
            .get("PC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let toggle_camera_every = match vars.get("PC_TOGGLE_CAMERA_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|e| {
                    ConfigError::InvalidValue(format!("PC_TOGGLE_CAMERA_SECS: {e}"))
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue(
                        "PC_TOGGLE_CAMERA_SECS must be greater than 0".to_string(),
                    ));
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Config {
            identity_prefix,
            local_name,
            remote_name,
            relay: RelayConfig {
                host: relay_host,
                port: relay_port,
                secure: relay_secure,
                ice_servers,
            },
            timing,
            capture: CaptureConstraints::default(),
            health_bind_address,
            toggle_camera_every,
        })
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match vars.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("{key}: {e}"))),
        None => Ok(default),
    }
}

/// Retry interval in milliseconds; zero would spin, so it is rejected.
fn interval(vars: &HashMap<String, String>, key: &str) -> Result<Duration, ConfigError> {
    let millis: u64 = parse_or(vars, key, DEFAULT_RETRY_INTERVAL_MS)?;
    if millis == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than 0"
        )));
    }
    Ok(Duration::from_millis(millis))
}

/// TURN settings are all-or-nothing: host, username and credential together.
fn turn_server(vars: &HashMap<String, String>) -> Result<Option<IceServer>, ConfigError> {
    let host = vars.get("PC_TURN_HOST");
    let username = vars.get("PC_TURN_USERNAME");
    let credential = vars.get("PC_TURN_CREDENTIAL");

    match (host, username, credential) {
        (None, None, None) => Ok(None),
        (Some(host), Some(username), Some(credential)) => {
            let port = parse_or(vars, "PC_TURN_PORT", DEFAULT_TURN_PORT)?;
            Ok(Some(IceServer::turn(
                format!("turn:{host}:{port}"),
                username.clone(),
                SecretString::from(credential.clone()),
            )))
        }
        _ => Err(ConfigError::InvalidValue(
            "PC_TURN_HOST, PC_TURN_USERNAME and PC_TURN_CREDENTIAL must be set together"
                .to_string(),
        )),
    }
}
