pub mod auth;
pub mod post;
pub mod user;

use crate::{
    model::{
        auth::WeakPasswordError,
        post::{EmptyCommentError, PostContentError},
        user::InvalidUsernameError,
    },
    snowflake::{Epoch, Snowflake, SnowflakeGenerator},
    util::NonPositiveDurationError,
};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;
use time::{OffsetDateTime, macros::datetime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    Username(#[from] InvalidUsernameError),
    #[error(transparent)]
    Password(#[from] WeakPasswordError),
    #[error(transparent)]
    PostContent(#[from] PostContentError),
    #[error(transparent)]
    Comment(#[from] EmptyCommentError),
    #[error(transparent)]
    NonPositiveDuration(#[from] NonPositiveDurationError),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct SnapfeedEpoch;
impl Epoch for SnapfeedEpoch {
    const EPOCH_TIME: OffsetDateTime = datetime!(2025-01-01 00:00 UTC);
}

pub type SnapfeedSnowflake = Snowflake<SnapfeedEpoch>;
pub type SnapfeedSnowflakeGenerator = SnowflakeGenerator<SnapfeedEpoch>;

/// An id tagged with the kind of object it refers to.
///
/// Serialized as a decimal string so JavaScript clients keep every bit.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct Id<Marker>(SnapfeedSnowflake, PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: SnapfeedSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> SnapfeedSnowflake {
        self.0
    }

    /// The id as stored in a signed `BIGINT` column.
    #[must_use]
    pub fn to_db(self) -> i64 {
        self.0.get().cast_signed()
    }

    #[must_use]
    pub fn from_db(value: i64) -> Self {
        value.cast_unsigned().into()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> FromStr for Id<Marker> {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str(s).map(Self::from)
    }
}

impl<Marker> From<SnapfeedSnowflake> for Id<Marker> {
    fn from(value: SnapfeedSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for SnapfeedSnowflake {
    fn from(value: Id<Marker>) -> Self {
        value.0
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(SnapfeedSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}

impl<Marker> Serialize for Id<Marker> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de, Marker> Deserialize<'de> for Id<Marker> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdVisitor<Marker>(PhantomData<Marker>);

        impl<Marker> Visitor<'_> for IdVisitor<Marker> {
            type Value = Id<Marker>;

            fn expecting(&self, f: &mut Formatter) -> std::fmt::Result {
                f.write_str("an id as a decimal string or unsigned integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(v.into())
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse()
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(IdVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Id, post::PostMarker};

    #[test]
    fn id_serializes_as_string() {
        let id = Id::<PostMarker>::from(u64::MAX);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"18446744073709551615\"");
        assert_eq!(serde_json::from_str::<Id<PostMarker>>(&json).unwrap(), id);
        assert_eq!(serde_json::from_str::<Id<PostMarker>>("42").unwrap(), Id::from(42_u64));
        assert!(serde_json::from_str::<Id<PostMarker>>("\"forty-two\"").is_err());
    }

    #[test]
    fn id_survives_bigint_columns() {
        let id = Id::<PostMarker>::from(u64::MAX - 5);
        assert!(id.to_db() < 0);
        assert_eq!(Id::<PostMarker>::from_db(id.to_db()), id);
    }
}
