//! Direct and group direct message channels.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::snowflake::{Entity, Ref, Snowflake};
use crate::user::User;

const DM_TYPE: u8 = 1;
const GROUP_DM_TYPE: u8 = 3;

/// A private conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PrivateChannelData", into = "PrivateChannelData")]
pub enum PrivateChannel {
    /// One-to-one conversation.
    Dm {
        /// Channel ID.
        id: Snowflake,
        /// The other participant.
        recipient: Ref<User>,
        /// Most recent message.
        last_message_id: Option<Snowflake>,
    },
    /// Conversation with several participants.
    GroupDm {
        /// Channel ID.
        id: Snowflake,
        /// Explicit group name.
        name: Option<String>,
        /// Icon hash.
        icon: Option<String>,
        /// Group owner.
        owner_id: Option<Snowflake>,
        /// Other participants.
        recipients: Vec<Ref<User>>,
        /// Most recent message.
        last_message_id: Option<Snowflake>,
    },
}

impl Entity for PrivateChannel {
    const KIND: &'static str = "private_channel";

    fn id(&self) -> Snowflake {
        match self {
            Self::Dm { id, .. } | Self::GroupDm { id, .. } => *id,
        }
    }
}

impl PrivateChannel {
    /// Every participant other than the current user.
    #[must_use]
    pub fn recipients(&self) -> Vec<Ref<User>> {
        match self {
            Self::Dm { recipient, .. } => vec![*recipient],
            Self::GroupDm { recipients, .. } => recipients.clone(),
        }
    }

    /// Most recent message.
    #[must_use]
    pub const fn last_message_id(&self) -> Option<Snowflake> {
        match self {
            Self::Dm {
                last_message_id, ..
            }
            | Self::GroupDm {
                last_message_id, ..
            } => *last_message_id,
        }
    }

    /// Record a new latest message.
    pub fn set_last_message_id(&mut self, message: Snowflake) {
        match self {
            Self::Dm {
                last_message_id, ..
            }
            | Self::GroupDm {
                last_message_id, ..
            } => *last_message_id = Some(message),
        }
    }

    /// Display name, using `users` to resolve participants.
    ///
    /// A DM is named after its recipient. A group DM uses its own name if
    /// set, otherwise the resolvable participants' usernames.
    #[must_use]
    pub fn name(&self, users: &[User]) -> String {
        let resolve = |r: &Ref<User>| users.iter().find(|u| u.id == r.id());
        match self {
            Self::Dm { recipient, .. } => resolve(recipient)
                .map_or_else(|| "Unknown User".to_string(), |u| u.username.clone()),
            Self::GroupDm {
                name: Some(name), ..
            } if !name.is_empty() => name.clone(),
            Self::GroupDm { recipients, .. } => {
                let names: Vec<&str> = recipients
                    .iter()
                    .filter_map(resolve)
                    .map(|u| u.username.as_str())
                    .collect();
                if names.is_empty() {
                    "Unnamed".to_string()
                } else {
                    names.join(", ")
                }
            }
        }
    }
}

/// Wire shape of a private channel.
///
/// Recipients arrive either as ids (`recipient_ids`, in session snapshots)
/// or as embedded user objects (`recipients`, in channel events).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateChannelData {
    /// Channel ID.
    pub id: Snowflake,
    /// Channel type, 1 or 3.
    #[serde(rename = "type")]
    pub kind: u8,
    /// Group name.
    #[serde(default)]
    pub name: Option<String>,
    /// Group icon.
    #[serde(default)]
    pub icon: Option<String>,
    /// Group owner.
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    /// Recipient ids.
    #[serde(default)]
    pub recipient_ids: Vec<Snowflake>,
    /// Embedded recipients.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<User>,
    /// Most recent message.
    #[serde(default)]
    pub last_message_id: Option<Snowflake>,
}

impl PrivateChannelData {
    /// Whether a raw channel type denotes a private channel.
    #[must_use]
    pub const fn is_private_type(kind: u8) -> bool {
        kind == DM_TYPE || kind == GROUP_DM_TYPE
    }

    /// Split into the channel and any embedded users.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-private channel type or a DM without a
    /// recipient.
    pub fn into_parts(self) -> Result<(PrivateChannel, Vec<User>), ProtoError> {
        let mut ids = self.recipient_ids;
        for user in &self.recipients {
            if !ids.contains(&user.id) {
                ids.push(user.id);
            }
        }
        let recipients: Vec<Ref<User>> = ids.into_iter().map(Ref::new).collect();

        let channel = match self.kind {
            DM_TYPE => PrivateChannel::Dm {
                id: self.id,
                recipient: *recipients
                    .first()
                    .ok_or(ProtoError::MissingField("recipient_ids"))?,
                last_message_id: self.last_message_id,
            },
            GROUP_DM_TYPE => PrivateChannel::GroupDm {
                id: self.id,
                name: self.name,
                icon: self.icon,
                owner_id: self.owner_id,
                recipients,
                last_message_id: self.last_message_id,
            },
            other => {
                return Err(ProtoError::Validation(format!(
                    "channel type {other} is not a private channel"
                )));
            }
        };
        Ok((channel, self.recipients))
    }
}

impl TryFrom<PrivateChannelData> for PrivateChannel {
    type Error = ProtoError;

    fn try_from(data: PrivateChannelData) -> Result<Self, Self::Error> {
        data.into_parts().map(|(channel, _)| channel)
    }
}

impl From<PrivateChannel> for PrivateChannelData {
    fn from(channel: PrivateChannel) -> Self {
        match channel {
            PrivateChannel::Dm {
                id,
                recipient,
                last_message_id,
            } => Self {
                id,
                kind: DM_TYPE,
                recipient_ids: vec![recipient.id()],
                last_message_id,
                ..Self::default()
            },
            PrivateChannel::GroupDm {
                id,
                name,
                icon,
                owner_id,
                recipients,
                last_message_id,
            } => Self {
                id,
                kind: GROUP_DM_TYPE,
                name,
                icon,
                owner_id,
                recipient_ids: recipients.into_iter().map(Ref::id).collect(),
                recipients: Vec::new(),
                last_message_id,
            },
        }
    }
}
