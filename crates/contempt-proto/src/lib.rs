//! # contempt-proto
//!
//! Gateway wire types and the entity model shared by the contempt client.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod disguise;
pub mod error;
pub mod events;
pub mod guild;
pub mod message;
pub mod packet;
pub mod permissions;
pub mod private;
pub mod settings;
pub mod snowflake;
pub mod user;

pub use disguise::{Branch, ClientProperties, Disguise};
pub use error::ProtoError;
pub use events::{ChannelPayload, DispatchEvent, Ready};
pub use guild::{ChannelType, Guild, GuildChannel, GuildMember, UnavailableGuild};
pub use message::{Attachment, CreateMessage, Message, Nonce};
pub use packet::{GatewayPacket, Hello, Identify, OpCode, Resume};
pub use permissions::{Overwrite, OverwriteKind, Permissions, Role};
pub use private::{PrivateChannel, PrivateChannelData};
pub use settings::{GuildFolder, UserSettings};
pub use snowflake::{Entity, Ref, Snowflake};
pub use user::{CurrentUser, User};
