//! Client configuration loaded from environment variables.
//!
//! Tunables fall back to their defaults when unset or unparseable. The local
//! identity is required: the merge rule cannot tell own messages apart
//! without it.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::path::PathBuf;
use std::time::Duration;

use crate::types::LocalUser;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_TYPING_IDLE_MS: u64 = 2000;
const DEFAULT_TYPING_TTL_MS: u64 = 5000;
const DEFAULT_RECONNECT_MIN_MS: u64 = 1000;
const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// REST base URL; the websocket URL is derived from it.
    pub base_url: String,
    /// Value of the `session_token` cookie, if authenticated.
    pub session_token: Option<String>,
    pub user: LocalUser,
    /// Local inactivity before "stop typing" is emitted.
    pub typing_idle: Duration,
    /// Lifetime of a remote typer without a stop signal.
    pub typing_ttl: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Where the last selected project is remembered.
    pub prefs_path: Option<PathBuf>,
}

impl ChatConfig {
    /// Defaults for everything but the identity.
    #[must_use]
    pub fn new(user: LocalUser) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            session_token: None,
            user,
            typing_idle: Duration::from_millis(DEFAULT_TYPING_IDLE_MS),
            typing_ttl: Duration::from_millis(DEFAULT_TYPING_TTL_MS),
            reconnect_min: Duration::from_millis(DEFAULT_RECONNECT_MIN_MS),
            reconnect_max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            prefs_path: None,
        }
    }

    /// Load from `TEAMROOM_*` environment variables.
    ///
    /// # Errors
    ///
    /// Fails when `TEAMROOM_USER_ID` or `TEAMROOM_USER_NAME` is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_id = lookup("TEAMROOM_USER_ID").ok_or(ConfigError::Missing("TEAMROOM_USER_ID"))?;
        let id = raw_id
            .trim()
            .parse::<i64>()
            .map_err(|_| ConfigError::Invalid { key: "TEAMROOM_USER_ID", value: raw_id.clone() })?;
        let name = lookup("TEAMROOM_USER_NAME")
            .map(|n| n.trim().to_owned())
            .filter(|n| !n.is_empty())
            .ok_or(ConfigError::Missing("TEAMROOM_USER_NAME"))?;

        let ms = |key: &str, default: u64| Duration::from_millis(parse_or(&lookup, key, default));
        let secs = |key: &str, default: u64| Duration::from_secs(parse_or(&lookup, key, default));

        let reconnect_min = ms("TEAMROOM_RECONNECT_MIN_MS", DEFAULT_RECONNECT_MIN_MS);
        let reconnect_max = ms("TEAMROOM_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX_MS).max(reconnect_min);

        Ok(Self {
            base_url: lookup("TEAMROOM_BASE_URL")
                .map(|url| url.trim().trim_end_matches('/').to_owned())
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            session_token: lookup("TEAMROOM_SESSION_TOKEN").filter(|t| !t.is_empty()),
            user: LocalUser { id, name },
            typing_idle: ms("TEAMROOM_TYPING_IDLE_MS", DEFAULT_TYPING_IDLE_MS),
            typing_ttl: ms("TEAMROOM_TYPING_TTL_MS", DEFAULT_TYPING_TTL_MS),
            reconnect_min,
            reconnect_max,
            request_timeout: secs("TEAMROOM_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: secs("TEAMROOM_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            prefs_path: lookup("TEAMROOM_PREFS_PATH").filter(|p| !p.is_empty()).map(PathBuf::from),
        })
    }

    /// Websocket endpoint derived from the base URL.
    ///
    /// # Errors
    ///
    /// Returns the base URL back when its scheme is not `http` or `https`.
    pub fn ws_url(&self) -> Result<String, String> {
        let base = self.base_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("http://") {
            return Ok(format!("ws://{rest}/api/ws"));
        }
        if let Some(rest) = base.strip_prefix("https://") {
            return Ok(format!("wss://{rest}/api/ws"));
        }
        Err(self.base_url.clone())
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key).and_then(|v| v.trim().parse::<T>().ok()).unwrap_or(default)
}
