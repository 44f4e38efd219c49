//! Client configuration.
//!
//! Configuration is read from TOML. Every section is optional; durations are
//! given in milliseconds.
//!
//! ```toml
//! token = "..."
//! branch = "canary"
//!
//! [gateway]
//! hello_timeout_ms = 10000
//!
//! [reconnect]
//! initial_delay_ms = 1000
//! max_delay_ms = 60000
//!
//! [close_codes]
//! authentication = [4004]
//! ```

use std::path::Path;
use std::time::Duration;

use contempt_proto::{Branch, Disguise};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::gateway::{CloseCodePolicy, GatewayConfig, HeartbeatConfig, ReconnectConfig};
use crate::http::HttpConfig;

/// Default gateway endpoint, without query parameters.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Default REST/gateway API version.
pub const DEFAULT_API_VERSION: u8 = 9;

/// Gateway timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewaySettings {
    /// Time allowed for the socket to open.
    pub connect_timeout_ms: u64,
    /// Time allowed between opening the socket and receiving HELLO.
    pub hello_timeout_ms: u64,
    /// Time allowed for the close handshake on disconnect.
    pub close_timeout_ms: u64,
    /// An ACK slower than this marks the connection unviable.
    pub ack_timeout_ms: u64,
    /// Lower bound of the wait before re-identifying after an invalid session.
    pub invalid_session_delay_min_ms: u64,
    /// Upper bound of that wait.
    pub invalid_session_delay_max_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            hello_timeout_ms: 10_000,
            close_timeout_ms: 5_000,
            ack_timeout_ms: 10_000,
            invalid_session_delay_min_ms: 1_000,
            invalid_session_delay_max_ms: 5_000,
        }
    }
}

/// Reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt.
    pub initial_delay_ms: u64,
    /// Backoff cap.
    pub max_delay_ms: u64,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Upper bound of the random delay added to each backoff.
    pub jitter_ms: u64,
    /// Give up after this many consecutive failed attempts.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_ms: 250,
            max_attempts: None,
        }
    }
}

/// Close code classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CloseCodeSettings {
    /// Codes meaning the token was rejected.
    pub authentication: Vec<u16>,
    /// Codes after which reconnecting is pointless.
    pub fatal: Vec<u16>,
    /// Codes that end the session; the client re-identifies.
    pub session_invalidating: Vec<u16>,
}

impl Default for CloseCodeSettings {
    fn default() -> Self {
        let policy = CloseCodePolicy::default();
        Self {
            authentication: policy.authentication,
            fatal: policy.fatal,
            session_invalidating: policy.session_invalidating,
        }
    }
}

/// REST client behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpSettings {
    /// Retries for network failures and 5xx responses.
    pub max_retries: u32,
    /// Base delay of the retry backoff.
    pub retry_base_delay_ms: u64,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 500,
            request_timeout_ms: 30_000,
        }
    }
}

/// Packet and request log retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    /// Entries kept before the oldest are dropped.
    pub capacity: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { capacity: 1_000 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Authentication token.
    #[serde(default)]
    pub token: String,
    /// Client branch; selects the REST endpoint.
    #[serde(default)]
    pub branch: Branch,
    /// Gateway URL without query parameters.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// API version for both gateway and REST.
    #[serde(default = "default_api_version")]
    pub api_version: u8,
    /// REST root override, e.g. for a local mock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    /// Gateway timing.
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// Reconnect backoff.
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Close code classification.
    #[serde(default)]
    pub close_codes: CloseCodeSettings,
    /// REST client behaviour.
    #[serde(default)]
    pub http: HttpSettings,
    /// Log retention.
    #[serde(default)]
    pub log: LogSettings,
    /// Client identity.
    #[serde(default)]
    pub disguise: Disguise,
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

const fn default_api_version() -> u8 {
    DEFAULT_API_VERSION
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            branch: Branch::default(),
            gateway_url: default_gateway_url(),
            api_version: DEFAULT_API_VERSION,
            api_base_url: None,
            gateway: GatewaySettings::default(),
            reconnect: ReconnectSettings::default(),
            close_codes: CloseCodeSettings::default(),
            http: HttpSettings::default(),
            log: LogSettings::default(),
            disguise: Disguise::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration with defaults and the given token.
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ClientError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// Only the shape is checked here; call [`validate`](Self::validate)
    /// once the token is known.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ClientError> {
        toml::from_str(content).map_err(|e| ClientError::Config(format!("invalid TOML: {e}")))
    }

    /// Serialize to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ClientError> {
        toml::to_string_pretty(self)
            .map_err(|e| ClientError::Config(format!("failed to serialize config: {e}")))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.token.trim().is_empty() {
            return Err(ClientError::Config("token cannot be empty".to_string()));
        }

        if !self.gateway_url.starts_with("ws://") && !self.gateway_url.starts_with("wss://") {
            return Err(ClientError::Config(
                "gateway_url must start with ws:// or wss://".to_string(),
            ));
        }
        url::Url::parse(&self.gateway_url)?;

        if let Some(base) = &self.api_base_url {
            url::Url::parse(base)?;
        }

        if self.api_version == 0 {
            return Err(ClientError::Config(
                "api_version must be greater than 0".to_string(),
            ));
        }

        if self.gateway.hello_timeout_ms == 0 || self.gateway.connect_timeout_ms == 0 {
            return Err(ClientError::Config(
                "gateway timeouts must be greater than 0".to_string(),
            ));
        }

        if self.gateway.invalid_session_delay_min_ms > self.gateway.invalid_session_delay_max_ms {
            return Err(ClientError::Config(
                "gateway.invalid_session_delay_min_ms cannot exceed the max".to_string(),
            ));
        }

        if self.reconnect.initial_delay_ms == 0 {
            return Err(ClientError::Config(
                "reconnect.initial_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(ClientError::Config(
                "reconnect.max_delay_ms cannot be less than initial_delay_ms".to_string(),
            ));
        }

        if self.reconnect.multiplier < 1.0 {
            return Err(ClientError::Config(
                "reconnect.multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.reconnect.max_attempts == Some(0) {
            return Err(ClientError::Config(
                "reconnect.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.log.capacity == 0 {
            return Err(ClientError::Config(
                "log.capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// REST API root.
    #[must_use]
    pub fn api_base_url(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| self.branch.api_url(self.api_version))
    }

    /// Web origin presented on the gateway upgrade and REST requests.
    #[must_use]
    pub fn origin(&self) -> String {
        self.branch.base_url().to_string()
    }

    /// Gateway connection settings.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            token: self.token.clone(),
            api_version: self.api_version,
            disguise: self.disguise.clone(),
            connect_timeout: Duration::from_millis(self.gateway.connect_timeout_ms),
            hello_timeout: Duration::from_millis(self.gateway.hello_timeout_ms),
            close_timeout: Duration::from_millis(self.gateway.close_timeout_ms),
            heartbeat: HeartbeatConfig {
                ack_timeout: Duration::from_millis(self.gateway.ack_timeout_ms),
            },
            invalid_session_delay: (
                Duration::from_millis(self.gateway.invalid_session_delay_min_ms),
                Duration::from_millis(self.gateway.invalid_session_delay_max_ms),
            ),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
                backoff_multiplier: self.reconnect.multiplier,
                jitter: Duration::from_millis(self.reconnect.jitter_ms),
                max_attempts: self.reconnect.max_attempts,
            },
            close_codes: CloseCodePolicy {
                authentication: self.close_codes.authentication.clone(),
                fatal: self.close_codes.fatal.clone(),
                session_invalidating: self.close_codes.session_invalidating.clone(),
            },
        }
    }

    /// REST client settings.
    #[must_use]
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            base_url: self.api_base_url(),
            origin: self.origin(),
            token: self.token.clone(),
            disguise: self.disguise.clone(),
            max_retries: self.http.max_retries,
            retry_base_delay: Duration::from_millis(self.http.retry_base_delay_ms),
            request_timeout: Duration::from_millis(self.http.request_timeout_ms),
        }
    }
}
