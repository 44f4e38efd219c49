//! Guilds and their channels.

use serde::{Deserialize, Serialize};

use crate::permissions::{Overwrite, PermissionContext, Role};
use crate::snowflake::{Entity, Snowflake};
use crate::user::User;

/// CDN root for guild icons.
pub const CDN_BASE_URL: &str = "https://cdn.discordapp.com";

/// Channel type. Types this client does not render are kept opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelType {
    /// Text channel.
    Text,
    /// Voice channel.
    Voice,
    /// Category grouping other channels.
    Category,
    /// Announcement channel.
    News,
    /// Stage channel.
    Stage,
    /// Forum channel.
    Forum,
    /// Anything else, with its raw type.
    Other(u8),
}

impl From<u8> for ChannelType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Text,
            2 => Self::Voice,
            4 => Self::Category,
            5 => Self::News,
            13 => Self::Stage,
            15 => Self::Forum,
            other => Self::Other(other),
        }
    }
}

impl From<ChannelType> for u8 {
    fn from(kind: ChannelType) -> Self {
        match kind {
            ChannelType::Text => 0,
            ChannelType::Voice => 2,
            ChannelType::Category => 4,
            ChannelType::News => 5,
            ChannelType::Stage => 13,
            ChannelType::Forum => 15,
            ChannelType::Other(raw) => raw,
        }
    }
}

impl ChannelType {
    /// Sort class among siblings: text-like, then voice-like, then categories.
    #[must_use]
    pub const fn sort_class(self) -> u8 {
        match self {
            Self::Voice | Self::Stage => 1,
            Self::Category => 2,
            Self::Text | Self::News | Self::Forum | Self::Other(_) => 0,
        }
    }
}

/// A channel belonging to a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildChannel {
    /// Channel ID.
    pub id: Snowflake,
    /// Channel type.
    #[serde(rename = "type")]
    pub kind: ChannelType,
    /// Owning guild. Omitted inside guild snapshots, filled in on decode.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// Parent category.
    #[serde(default)]
    pub parent_id: Option<Snowflake>,
    /// Channel name.
    #[serde(default)]
    pub name: String,
    /// Channel topic.
    #[serde(default)]
    pub topic: Option<String>,
    /// Explicit position among siblings.
    #[serde(default)]
    pub position: i64,
    /// Permission overwrites.
    #[serde(default)]
    pub permission_overwrites: Vec<Overwrite>,
    /// Most recent message.
    #[serde(default)]
    pub last_message_id: Option<Snowflake>,
    /// Age-restricted.
    #[serde(default)]
    pub nsfw: bool,
}

impl Entity for GuildChannel {
    const KIND: &'static str = "channel";

    fn id(&self) -> Snowflake {
        self.id
    }
}

impl GuildChannel {
    /// Key used to order siblings: type class, then position, then id.
    #[must_use]
    pub fn sort_key(&self) -> (u8, i64, Snowflake) {
        (self.kind.sort_class(), self.position, self.id)
    }
}

/// Sort sibling channels by type class, then position, then id.
pub fn sort_channels(channels: &mut [&GuildChannel]) {
    channels.sort_by_key(|channel| channel.sort_key());
}

/// Guild membership of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMember {
    /// The member's user, when included.
    #[serde(default)]
    pub user: Option<User>,
    /// Guild nickname.
    #[serde(default)]
    pub nick: Option<String>,
    /// Held roles.
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

/// A guild snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    /// Guild ID.
    pub id: Snowflake,
    /// Guild name.
    #[serde(default)]
    pub name: String,
    /// Icon hash.
    #[serde(default)]
    pub icon: Option<String>,
    /// Owner.
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    /// Roles, including `@everyone`.
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Channels in the order received.
    #[serde(default)]
    pub channels: Vec<GuildChannel>,
    /// Members included in the snapshot, usually just the current user.
    #[serde(default)]
    pub members: Vec<GuildMember>,
    /// Set while the guild is unreachable because of an outage.
    #[serde(default)]
    pub unavailable: bool,
}

impl Entity for Guild {
    const KIND: &'static str = "guild";

    fn id(&self) -> Snowflake {
        self.id
    }
}

impl Guild {
    /// Set every channel's `guild_id` to this guild.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        for channel in &mut self.channels {
            channel.guild_id = Some(self.id);
        }
        self
    }

    /// CDN URL of the icon at the given pixel size.
    #[must_use]
    pub fn icon_url(&self, size: u32) -> Option<String> {
        let hash = self.icon.as_deref()?;
        let ext = if hash.starts_with("a_") { "gif" } else { "png" };
        Some(format!(
            "{CDN_BASE_URL}/icons/{}/{hash}.{ext}?size={size}",
            self.id
        ))
    }

    /// A channel by id.
    #[must_use]
    pub fn channel(&self, id: Snowflake) -> Option<&GuildChannel> {
        self.channels.iter().find(|channel| channel.id == id)
    }

    /// Insert or replace a channel, keeping its slot in the list.
    ///
    /// Returns `false` if an identical channel was already present.
    pub fn upsert_channel(&mut self, mut channel: GuildChannel) -> bool {
        channel.guild_id = Some(self.id);
        match self.channels.iter_mut().find(|c| c.id == channel.id) {
            Some(existing) if *existing == channel => false,
            Some(existing) => {
                *existing = channel;
                true
            }
            None => {
                self.channels.push(channel);
                true
            }
        }
    }

    /// Remove a channel. Returns whether it was present.
    pub fn remove_channel(&mut self, id: Snowflake) -> bool {
        let before = self.channels.len();
        self.channels.retain(|channel| channel.id != id);
        self.channels.len() != before
    }

    /// Permission inputs for `user_id`.
    #[must_use]
    pub fn permission_context(&self, user_id: Snowflake) -> PermissionContext<'_> {
        let member_roles = self
            .members
            .iter()
            .find(|m| m.user.as_ref().is_some_and(|u| u.id == user_id))
            .map_or(&[][..], |m| m.roles.as_slice());
        PermissionContext {
            guild_id: self.id,
            owner_id: self.owner_id,
            roles: &self.roles,
            user_id,
            member_roles,
        }
    }

    /// Whether `user_id` can see `channel`.
    #[must_use]
    pub fn is_visible(&self, channel: &GuildChannel, user_id: Snowflake) -> bool {
        // Snapshots without role data carry no information to hide anything.
        if self.roles.is_empty() {
            return true;
        }
        self.permission_context(user_id)
            .can_view(&channel.permission_overwrites)
    }

    /// Visible channels without a parent, sorted.
    #[must_use]
    pub fn sorted_top_level_channels(&self, user_id: Snowflake) -> Vec<&GuildChannel> {
        self.sorted_where(user_id, |channel| channel.parent_id.is_none())
    }

    /// Visible children of a category, sorted.
    #[must_use]
    pub fn children_of(&self, category: Snowflake, user_id: Snowflake) -> Vec<&GuildChannel> {
        self.sorted_where(user_id, |channel| channel.parent_id == Some(category))
    }

    fn sorted_where(
        &self,
        user_id: Snowflake,
        filter: impl Fn(&GuildChannel) -> bool,
    ) -> Vec<&GuildChannel> {
        let mut channels: Vec<&GuildChannel> = self
            .channels
            .iter()
            .filter(|channel| filter(channel) && self.is_visible(channel, user_id))
            .collect();
        sort_channels(&mut channels);
        channels
    }
}

/// Payload of a guild removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableGuild {
    /// Guild ID.
    pub id: Snowflake,
    /// `true` for an outage, absent when the user left or was removed.
    #[serde(default)]
    pub unavailable: bool,
}
