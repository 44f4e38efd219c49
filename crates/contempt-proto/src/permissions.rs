//! Permission bits, roles and channel overwrites.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::snowflake::{Entity, Snowflake};

/// A permission bitset, encoded as a decimal string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions(u64);

impl Permissions {
    /// No permissions.
    pub const NONE: Self = Self(0);
    /// Bypasses every overwrite.
    pub const ADMINISTRATOR: Self = Self(1 << 3);
    /// See a channel and read its history.
    pub const VIEW_CHANNEL: Self = Self(1 << 10);
    /// Send messages in a text channel.
    pub const SEND_MESSAGES: Self = Self(1 << 11);
    /// Read message history.
    pub const READ_MESSAGE_HISTORY: Self = Self(1 << 16);
    /// Every bit set.
    pub const ALL: Self = Self(u64::MAX);

    /// Wrap raw bits.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Clear the `deny` bits then set the `allow` bits.
    #[must_use]
    pub const fn apply(self, allow: Self, deny: Self) -> Self {
        Self((self.0 & !deny.0) | allow.0)
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for Permissions {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for Permissions {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BitsVisitor;

        impl Visitor<'_> for BitsVisitor {
            type Value = Permissions;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("permission bits as a string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Permissions, E> {
                Ok(Permissions(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Permissions, E> {
                v.parse().map(Permissions).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(BitsVisitor)
    }
}

/// A guild role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role ID. The `@everyone` role shares its guild's ID.
    pub id: Snowflake,
    /// Role name.
    pub name: String,
    /// Base permissions granted by the role.
    #[serde(default)]
    pub permissions: Permissions,
    /// Sort position.
    #[serde(default)]
    pub position: i64,
    /// RGB colour, 0 for none.
    #[serde(default)]
    pub color: u32,
}

impl Entity for Role {
    const KIND: &'static str = "role";

    fn id(&self) -> Snowflake {
        self.id
    }
}

/// What an overwrite targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OverwriteKind {
    /// Applies to every member holding a role.
    Role,
    /// Applies to one member.
    Member,
}

impl TryFrom<u8> for OverwriteKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Role),
            1 => Ok(Self::Member),
            other => Err(format!("unknown overwrite type: {other}")),
        }
    }
}

impl From<OverwriteKind> for u8 {
    fn from(kind: OverwriteKind) -> Self {
        match kind {
            OverwriteKind::Role => 0,
            OverwriteKind::Member => 1,
        }
    }
}

/// A per-channel permission overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overwrite {
    /// Role or user ID.
    pub id: Snowflake,
    /// Target kind.
    #[serde(rename = "type")]
    pub kind: OverwriteKind,
    /// Bits granted.
    #[serde(default)]
    pub allow: Permissions,
    /// Bits revoked.
    #[serde(default)]
    pub deny: Permissions,
}

/// Inputs needed to compute a member's permissions in one channel.
#[derive(Debug, Clone, Copy)]
pub struct PermissionContext<'a> {
    /// The guild's ID, which is also the `@everyone` role ID.
    pub guild_id: Snowflake,
    /// The guild owner.
    pub owner_id: Option<Snowflake>,
    /// All guild roles.
    pub roles: &'a [Role],
    /// The member being evaluated.
    pub user_id: Snowflake,
    /// Roles the member holds, not including `@everyone`.
    pub member_roles: &'a [Snowflake],
}

impl PermissionContext<'_> {
    /// Guild-level permissions before channel overwrites.
    #[must_use]
    pub fn base_permissions(&self) -> Permissions {
        if self.owner_id == Some(self.user_id) {
            return Permissions::ALL;
        }
        let perms = self
            .roles
            .iter()
            .filter(|role| role.id == self.guild_id || self.member_roles.contains(&role.id))
            .fold(Permissions::NONE, |acc, role| acc | role.permissions);
        if perms.contains(Permissions::ADMINISTRATOR) {
            Permissions::ALL
        } else {
            perms
        }
    }

    /// Permissions in a channel with the given overwrites.
    ///
    /// Overwrites apply in order: `@everyone`, then the union of role
    /// overwrites, then the member overwrite.
    #[must_use]
    pub fn channel_permissions(&self, overwrites: &[Overwrite]) -> Permissions {
        let base = self.base_permissions();
        if base.contains(Permissions::ADMINISTRATOR) {
            return Permissions::ALL;
        }

        let mut perms = base;
        if let Some(everyone) = overwrites.iter().find(|o| o.id == self.guild_id) {
            perms = perms.apply(everyone.allow, everyone.deny);
        }

        let (allow, deny) = overwrites
            .iter()
            .filter(|o| o.kind == OverwriteKind::Role && self.member_roles.contains(&o.id))
            .fold((Permissions::NONE, Permissions::NONE), |(a, d), o| {
                (a | o.allow, d | o.deny)
            });
        perms = perms.apply(allow, deny);

        if let Some(member) = overwrites
            .iter()
            .find(|o| o.kind == OverwriteKind::Member && o.id == self.user_id)
        {
            perms = perms.apply(member.allow, member.deny);
        }
        perms
    }

    /// Whether the member can see a channel with the given overwrites.
    #[must_use]
    pub fn can_view(&self, overwrites: &[Overwrite]) -> bool {
        self.channel_permissions(overwrites)
            .contains(Permissions::VIEW_CHANNEL)
    }
}
