//! Client configuration.
//!
//! Built programmatically via [`ClientConfig::new`] or from environment
//! variables via [`ClientConfig::from_env`]. All knobs have documented
//! defaults; only the backend URL is required.

use std::env;
use std::time::Duration;

use url::Url;

use crate::errors::ConfigError;

pub const DEFAULT_BOT_TYPE: &str = "personal_trainer";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Delay between data channel open and the greeting `response.create`.
pub const DEFAULT_GREETING_DELAY_MS: u64 = 500;
/// Upper bound on the offer/answer round trip through the backend.
pub const DEFAULT_SDP_TIMEOUT_MS: u64 = 10_000;
/// Upper bound on ICE reaching a connected state after the answer is applied.
pub const DEFAULT_ICE_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend signaling facade.
    pub backend_url: Url,
    /// Persona requested from the backend on session start.
    pub bot_type: String,
    pub greeting_delay: Duration,
    pub sdp_timeout: Duration,
    pub ice_timeout: Duration,
    pub http_timeout: Duration,
    pub ice_servers: Vec<String>,
}

impl ClientConfig {
    pub fn new(backend_url: Url) -> Self {
        Self {
            backend_url,
            bot_type: DEFAULT_BOT_TYPE.to_string(),
            greeting_delay: Duration::from_millis(DEFAULT_GREETING_DELAY_MS),
            sdp_timeout: Duration::from_millis(DEFAULT_SDP_TIMEOUT_MS),
            ice_timeout: Duration::from_millis(DEFAULT_ICE_TIMEOUT_MS),
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }

    /// Load from `FITVOICE_*` environment variables.
    ///
    /// `FITVOICE_BACKEND_URL` is required. Optional overrides:
    /// `FITVOICE_BOT_TYPE`, `FITVOICE_GREETING_DELAY_MS`,
    /// `FITVOICE_SDP_TIMEOUT_MS`, `FITVOICE_ICE_TIMEOUT_MS`,
    /// `FITVOICE_HTTP_TIMEOUT_MS`, `FITVOICE_STUN_SERVER`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = env::var("FITVOICE_BACKEND_URL")
            .map_err(|_| ConfigError::MissingVar("FITVOICE_BACKEND_URL"))?;
        let backend_url = Url::parse(&raw).map_err(|e| ConfigError::InvalidVar {
            var: "FITVOICE_BACKEND_URL",
            reason: e.to_string(),
        })?;

        let mut config = Self::new(backend_url);
        if let Ok(bot_type) = env::var("FITVOICE_BOT_TYPE") {
            config.bot_type = bot_type;
        }
        if let Some(delay) = duration_var("FITVOICE_GREETING_DELAY_MS")? {
            config.greeting_delay = delay;
        }
        if let Some(timeout) = duration_var("FITVOICE_SDP_TIMEOUT_MS")? {
            config.sdp_timeout = timeout;
        }
        if let Some(timeout) = duration_var("FITVOICE_ICE_TIMEOUT_MS")? {
            config.ice_timeout = timeout;
        }
        if let Some(timeout) = duration_var("FITVOICE_HTTP_TIMEOUT_MS")? {
            config.http_timeout = timeout;
        }
        if let Ok(stun) = env::var("FITVOICE_STUN_SERVER") {
            config.ice_servers = vec![stun];
        }
        Ok(config)
    }

    /// Backend base with a guaranteed trailing slash, for endpoint joins.
    pub fn endpoint_base(&self) -> String {
        let base = self.backend_url.as_str();
        if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        }
    }
}

fn duration_var(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| ConfigError::InvalidVar {
                var,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
