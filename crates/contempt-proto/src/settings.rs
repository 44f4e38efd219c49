//! Account settings document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtoError;
use crate::snowflake::{Entity, Snowflake};

/// A folder grouping guilds in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildFolder {
    /// Folder ID; absent for the implicit single-guild folders.
    #[serde(default)]
    pub id: Option<Value>,
    /// Folder name.
    #[serde(default)]
    pub name: Option<String>,
    /// Folder colour.
    #[serde(default)]
    pub color: Option<u32>,
    /// Guilds in the folder, in display order.
    #[serde(default)]
    pub guild_ids: Vec<Snowflake>,
}

/// User settings.
///
/// Only the keys below are interpreted; everything else is kept in `extra`
/// and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Guild order, used when there are no folders.
    pub guild_positions: Vec<Snowflake>,
    /// Guild folders.
    pub guild_folders: Vec<GuildFolder>,
    /// Interface locale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// `dark` or `light`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    /// Unrecognised keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserSettings {
    /// Apply a partial update: keys in `patch` replace the current values.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognised key in the patch has the wrong shape.
    /// `self` is unchanged in that case.
    pub fn merge(&mut self, patch: Map<String, Value>) -> Result<(), ProtoError> {
        let mut current = match serde_json::to_value(&*self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => return Err(ProtoError::Encoding(e.to_string())),
        };
        current.extend(patch);
        *self = serde_json::from_value(Value::Object(current))
            .map_err(|e| ProtoError::Decoding(e.to_string()))?;
        Ok(())
    }

    /// Guild ids in display order: folder order if any folders exist,
    /// otherwise `guild_positions`.
    #[must_use]
    pub fn guild_order(&self) -> Vec<Snowflake> {
        if self.guild_folders.is_empty() {
            self.guild_positions.clone()
        } else {
            self.guild_folders
                .iter()
                .flat_map(|folder| folder.guild_ids.iter().copied())
                .collect()
        }
    }

    /// Sort guilds for display.
    ///
    /// Guilds missing from the stored order come first, in input order; the
    /// rest follow the stored order.
    #[must_use]
    pub fn sort_guilds<'a, T: Entity>(&self, guilds: impl IntoIterator<Item = &'a T>) -> Vec<&'a T> {
        let order = self.guild_order();
        let (mut positioned, mut sorted): (Vec<&T>, Vec<&T>) = guilds
            .into_iter()
            .partition(|guild| order.contains(&guild.id()));
        positioned.sort_by_key(|guild| order.iter().position(|id| *id == guild.id()));
        sorted.append(&mut positioned);
        sorted
    }
}
