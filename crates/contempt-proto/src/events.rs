//! Typed dispatch events.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ProtoError;
use crate::guild::{Guild, GuildChannel, UnavailableGuild};
use crate::message::Message;
use crate::private::{PrivateChannel, PrivateChannelData};
use crate::settings::UserSettings;
use crate::user::{CurrentUser, User};

/// Full-session snapshot sent once after identify.
#[derive(Debug, Clone, PartialEq)]
pub struct Ready {
    /// Session to resume later.
    pub session_id: String,
    /// Gateway URL to use when resuming.
    pub resume_gateway_url: Option<String>,
    /// The logged-in account.
    pub user: CurrentUser,
    /// Guilds, possibly unavailable placeholders.
    pub guilds: Vec<Guild>,
    /// Private channels in server order.
    pub private_channels: Vec<PrivateChannel>,
    /// Users referenced by the snapshot.
    pub users: Vec<User>,
    /// Account settings.
    pub user_settings: Option<UserSettings>,
}

#[derive(Deserialize)]
struct RawReady {
    session_id: String,
    #[serde(default)]
    resume_gateway_url: Option<String>,
    user: CurrentUser,
    #[serde(default)]
    guilds: Vec<Guild>,
    #[serde(default)]
    private_channels: Vec<PrivateChannelData>,
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    user_settings: Option<UserSettings>,
}

impl TryFrom<RawReady> for Ready {
    type Error = ProtoError;

    fn try_from(raw: RawReady) -> Result<Self, Self::Error> {
        let mut users = raw.users;
        let mut private_channels = Vec::with_capacity(raw.private_channels.len());
        for data in raw.private_channels {
            let (channel, embedded) = data.into_parts()?;
            private_channels.push(channel);
            users.extend(embedded);
        }
        Ok(Self {
            session_id: raw.session_id,
            resume_gateway_url: raw.resume_gateway_url,
            user: raw.user,
            guilds: raw.guilds.into_iter().map(Guild::normalized).collect(),
            private_channels,
            users,
            user_settings: raw.user_settings,
        })
    }
}

/// A channel carried by a channel event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPayload {
    /// A guild channel.
    Guild(GuildChannel),
    /// A private channel with any embedded recipients.
    Private {
        /// The channel.
        channel: PrivateChannel,
        /// Embedded recipients.
        users: Vec<User>,
    },
}

impl ChannelPayload {
    fn decode(payload: Value) -> Result<Self, ProtoError> {
        let kind = payload
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(ProtoError::MissingField("type"))?;
        if u8::try_from(kind).is_ok_and(PrivateChannelData::is_private_type) {
            let (channel, users) = decode::<PrivateChannelData>(payload)?.into_parts()?;
            Ok(Self::Private { channel, users })
        } else {
            Ok(Self::Guild(decode(payload)?))
        }
    }
}

/// A dispatch event this client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// `READY`.
    Ready(Box<Ready>),
    /// `RESUMED`.
    Resumed,
    /// `GUILD_CREATE`.
    GuildCreate(Box<Guild>),
    /// `GUILD_UPDATE`.
    GuildUpdate(Box<Guild>),
    /// `GUILD_DELETE`.
    GuildDelete(UnavailableGuild),
    /// `CHANNEL_CREATE`.
    ChannelCreate(ChannelPayload),
    /// `CHANNEL_UPDATE`.
    ChannelUpdate(ChannelPayload),
    /// `CHANNEL_DELETE`.
    ChannelDelete(ChannelPayload),
    /// `MESSAGE_CREATE`.
    MessageCreate(Box<Message>),
    /// `USER_UPDATE`, for the current user.
    UserUpdate(Box<CurrentUser>),
    /// `USER_SETTINGS_UPDATE`, a partial settings document.
    UserSettingsUpdate(Map<String, Value>),
}

impl DispatchEvent {
    /// Names of every recognised event.
    pub const NAMES: &'static [&'static str] = &[
        "READY",
        "RESUMED",
        "GUILD_CREATE",
        "GUILD_UPDATE",
        "GUILD_DELETE",
        "CHANNEL_CREATE",
        "CHANNEL_UPDATE",
        "CHANNEL_DELETE",
        "MESSAGE_CREATE",
        "USER_UPDATE",
        "USER_SETTINGS_UPDATE",
    ];

    /// Decode a dispatch payload.
    ///
    /// Returns `Ok(None)` for events this client does not interpret.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognised event's payload is malformed.
    pub fn decode(name: &str, payload: Option<Value>) -> Result<Option<Self>, ProtoError> {
        if !Self::NAMES.contains(&name) {
            return Ok(None);
        }
        if name == "RESUMED" {
            return Ok(Some(Self::Resumed));
        }
        let payload = payload.ok_or(ProtoError::MissingField("d"))?;
        let event = match name {
            "READY" => Self::Ready(Box::new(Ready::try_from(decode::<RawReady>(payload)?)?)),
            "GUILD_CREATE" => Self::GuildCreate(Box::new(decode::<Guild>(payload)?.normalized())),
            "GUILD_UPDATE" => Self::GuildUpdate(Box::new(decode::<Guild>(payload)?.normalized())),
            "GUILD_DELETE" => Self::GuildDelete(decode(payload)?),
            "CHANNEL_CREATE" => Self::ChannelCreate(ChannelPayload::decode(payload)?),
            "CHANNEL_UPDATE" => Self::ChannelUpdate(ChannelPayload::decode(payload)?),
            "CHANNEL_DELETE" => Self::ChannelDelete(ChannelPayload::decode(payload)?),
            "MESSAGE_CREATE" => Self::MessageCreate(Box::new(decode(payload)?)),
            "USER_UPDATE" => Self::UserUpdate(Box::new(decode(payload)?)),
            "USER_SETTINGS_UPDATE" => match payload {
                Value::Object(map) => Self::UserSettingsUpdate(map),
                other => {
                    return Err(ProtoError::Decoding(format!(
                        "USER_SETTINGS_UPDATE payload is not an object: {other}"
                    )));
                }
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// The wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "READY",
            Self::Resumed => "RESUMED",
            Self::GuildCreate(_) => "GUILD_CREATE",
            Self::GuildUpdate(_) => "GUILD_UPDATE",
            Self::GuildDelete(_) => "GUILD_DELETE",
            Self::ChannelCreate(_) => "CHANNEL_CREATE",
            Self::ChannelUpdate(_) => "CHANNEL_UPDATE",
            Self::ChannelDelete(_) => "CHANNEL_DELETE",
            Self::MessageCreate(_) => "MESSAGE_CREATE",
            Self::UserUpdate(_) => "USER_UPDATE",
            Self::UserSettingsUpdate(_) => "USER_SETTINGS_UPDATE",
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, ProtoError> {
    serde_json::from_value(payload).map_err(|e| ProtoError::Decoding(e.to_string()))
}
