//! Messages and message REST bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snowflake::{Entity, Snowflake};
use crate::user::User;

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment ID.
    pub id: Snowflake,
    /// File name.
    pub filename: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Download URL.
    pub url: String,
    /// Proxied download URL.
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// MIME type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Image width.
    #[serde(default)]
    pub width: Option<u32>,
    /// Image height.
    #[serde(default)]
    pub height: Option<u32>,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID.
    pub id: Snowflake,
    /// Channel the message was sent in.
    pub channel_id: Snowflake,
    /// Guild, for guild channels.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// Author.
    pub author: User,
    /// Text content.
    #[serde(default)]
    pub content: String,
    /// Send time.
    pub timestamp: DateTime<Utc>,
    /// Last edit time.
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    /// Text-to-speech.
    #[serde(default)]
    pub tts: bool,
    /// Client-chosen idempotency token echoed back by the server.
    #[serde(default)]
    pub nonce: Option<Nonce>,
    /// Attachments.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Entity for Message {
    const KIND: &'static str = "message";

    fn id(&self) -> Snowflake {
        self.id
    }
}

/// A nonce as echoed by the server, which may send it as a string or number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Nonce {
    /// Numeric nonce.
    Number(u64),
    /// String nonce.
    Text(String),
}

impl Nonce {
    /// The nonce as text.
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// Body of `POST /channels/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMessage {
    /// Text content.
    pub content: String,
    /// Text-to-speech.
    pub tts: bool,
    /// Idempotency token.
    pub nonce: String,
}

impl CreateMessage {
    /// A plain message with the given nonce.
    #[must_use]
    pub fn new(content: impl Into<String>, nonce: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tts: false,
            nonce: nonce.into(),
        }
    }
}
