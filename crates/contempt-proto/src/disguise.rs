//! Client identity presented to the remote service.
//!
//! The same identity is sent in the gateway identify payload and, encoded as
//! `X-Super-Properties`, on every REST request.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Release branch of the desktop client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// The stable channel.
    #[default]
    Stable,
    /// Public test build.
    Ptb,
    /// Canary.
    Canary,
}

impl Branch {
    /// Web origin of this branch.
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Stable => "https://discord.com",
            Self::Ptb => "https://ptb.discord.com",
            Self::Canary => "https://canary.discord.com",
        }
    }

    /// REST API root for the given API version.
    #[must_use]
    pub fn api_url(self, version: u8) -> String {
        format!("{}/api/v{version}", self.base_url())
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Ptb => "ptb",
            Self::Canary => "canary",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Branch {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "ptb" => Ok(Self::Ptb),
            "canary" => Ok(Self::Canary),
            other => Err(ProtoError::Validation(format!("unknown branch: {other}"))),
        }
    }
}

/// The fixed client identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disguise {
    /// Browser user agent string.
    pub user_agent: String,
    /// Gateway capability bitmask.
    pub capabilities: u64,
    /// Operating system name.
    pub os: String,
    /// Browser name.
    pub browser: String,
    /// Release channel.
    pub release_channel: Branch,
    /// Desktop client version.
    pub client_version: String,
    /// Operating system version.
    pub os_version: String,
    /// CPU architecture.
    pub os_arch: String,
    /// Locale, e.g. `en-US`.
    pub system_locale: String,
    /// Client build number.
    pub client_build_number: u64,
    /// Event source, normally absent.
    #[serde(default)]
    pub client_event_source: Option<String>,
}

impl Default for Disguise {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) discord/0.0.278 Chrome/91.0.4472.164 \
                         Electron/13.4.0 Safari/537.36"
                .to_string(),
            capabilities: 125,
            os: "Mac OS X".to_string(),
            browser: "Discord Client".to_string(),
            release_channel: Branch::Canary,
            client_version: "0.0.278".to_string(),
            os_version: "21.2.0".to_string(),
            os_arch: "x64".to_string(),
            system_locale: "en-US".to_string(),
            client_build_number: 105_780,
            client_event_source: None,
        }
    }
}

impl Disguise {
    /// Identity fields as sent in identify and `X-Super-Properties`.
    #[must_use]
    pub fn properties(&self) -> ClientProperties {
        ClientProperties {
            os: self.os.clone(),
            browser: self.browser.clone(),
            release_channel: self.release_channel,
            client_version: self.client_version.clone(),
            os_version: self.os_version.clone(),
            os_arch: self.os_arch.clone(),
            system_locale: self.system_locale.clone(),
            browser_user_agent: self.user_agent.clone(),
            client_build_number: self.client_build_number,
            client_event_source: self.client_event_source.clone(),
        }
    }

    /// Base64 of the JSON-encoded properties.
    ///
    /// # Errors
    ///
    /// Returns an error if the properties cannot be encoded.
    pub fn super_properties(&self) -> Result<String, ProtoError> {
        let json = serde_json::to_vec(&self.properties())
            .map_err(|e| ProtoError::Encoding(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }

    /// Headers attached to every REST request, excluding authorization and origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the super properties cannot be encoded.
    pub fn headers(&self) -> Result<Vec<(&'static str, String)>, ProtoError> {
        let language = self
            .system_locale
            .split('-')
            .next()
            .unwrap_or("en")
            .to_string();
        Ok(vec![
            ("User-Agent", self.user_agent.clone()),
            ("X-Super-Properties", self.super_properties()?),
            ("X-Discord-Locale", self.system_locale.clone()),
            ("X-Debug-Options", "bugReporterEnabled".to_string()),
            (
                "Accept-Language",
                format!("{},{language};q=0.9", self.system_locale),
            ),
        ])
    }
}

/// Client identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProperties {
    /// Operating system name.
    pub os: String,
    /// Browser name.
    pub browser: String,
    /// Release channel.
    pub release_channel: Branch,
    /// Desktop client version.
    pub client_version: String,
    /// Operating system version.
    pub os_version: String,
    /// CPU architecture.
    pub os_arch: String,
    /// Locale.
    pub system_locale: String,
    /// Browser user agent string.
    pub browser_user_agent: String,
    /// Client build number.
    pub client_build_number: u64,
    /// Event source.
    pub client_event_source: Option<String>,
}
