//! Snowflake identifiers and typed weak references.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProtoError;

/// Milliseconds between the Unix epoch and the first second of 2015.
pub const SNOWFLAKE_EPOCH_MS: u64 = 1_420_070_400_000;

/// A 64-bit entity identifier with an embedded creation timestamp.
///
/// Serialised as a decimal string; decoding also accepts a JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Snowflake(u64);

impl Snowflake {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Build a snowflake whose timestamp bits encode `timestamp`.
    ///
    /// The worker, process and increment bits are left zero, which makes the
    /// result useful as a pagination cursor.
    #[must_use]
    pub fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        let millis = u64::try_from(timestamp.timestamp_millis()).unwrap_or(0);
        Self(millis.saturating_sub(SNOWFLAKE_EPOCH_MS) << 22)
    }

    /// Parse a snowflake from its decimal representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid unsigned 64-bit integer.
    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|e| ProtoError::Validation(format!("invalid snowflake '{s}': {e}")))
    }

    /// The raw 64-bit value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Creation time embedded in the upper 42 bits.
    #[must_use]
    pub fn timestamp(self) -> DateTime<Utc> {
        let millis = (self.0 >> 22) + SNOWFLAKE_EPOCH_MS;
        DateTime::from_timestamp_millis(millis as i64).unwrap_or_default()
    }

    /// Tag this identifier as naming an entity of kind `T`.
    #[must_use]
    pub const fn to_ref<T>(self) -> Ref<T> {
        Ref::new(self)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for Snowflake {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnowflakeVisitor;

        impl Visitor<'_> for SnowflakeVisitor {
            type Value = Snowflake;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snowflake as a decimal string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Snowflake, E> {
                Ok(Snowflake(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Snowflake, E> {
                u64::try_from(v)
                    .map(Snowflake)
                    .map_err(|_| E::custom(format!("negative snowflake: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Snowflake, E> {
                v.parse::<u64>().map(Snowflake).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

/// An entity addressable by snowflake.
pub trait Entity {
    /// Human-readable kind name, used in diagnostics.
    const KIND: &'static str;

    /// The entity's identifier.
    fn id(&self) -> Snowflake;

    /// A non-owning reference to this entity.
    fn to_ref(&self) -> Ref<Self>
    where
        Self: Sized,
    {
        Ref::new(self.id())
    }
}

/// A typed, non-owning reference to an entity.
///
/// A `Ref` never owns or borrows its target; it is only a lookup key and
/// stays valid even while the referent is absent from any cache. Two refs
/// are equal iff their snowflakes are equal.
pub struct Ref<T> {
    id: Snowflake,
    kind: PhantomData<fn() -> T>,
}

impl<T> Ref<T> {
    /// Wrap a snowflake.
    #[must_use]
    pub const fn new(id: Snowflake) -> Self {
        Self {
            id,
            kind: PhantomData,
        }
    }

    /// The referenced snowflake.
    #[must_use]
    pub const fn id(self) -> Snowflake {
        self.id
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ref<T> {}

impl<T> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Ref<T> {}

impl<T> Hash for Ref<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> PartialOrd for Ref<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Ref<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T: Entity> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref<{}>({})", T::KIND, self.id)
    }
}

impl<T> From<Snowflake> for Ref<T> {
    fn from(id: Snowflake) -> Self {
        Self::new(id)
    }
}

impl<T> Serialize for Ref<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Ref<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Snowflake::deserialize(deserializer).map(Self::new)
    }
}
