use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Defines a strongly typed identifier over a UUID.
///
/// Ids are parsed once where they enter the system (path segments, JSON bodies,
/// database rows) and compared by value from then on.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| IdParseError {
                        kind: stringify!($name),
                        raw: s.to_string(),
                    })
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    /// A registered user (requester, host, or any chat participant).
    UserId
);
define_id!(VisitId);
define_id!(HousingId);
define_id!(MessageId);
define_id!(ReminderId);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {raw:?}")]
pub struct IdParseError {
    pub kind: &'static str,
    pub raw: String,
}

/// Caller-supplied housing key, parsed once.
///
/// Internal ids are UUIDs; anything else is treated as a key issued by an
/// external listing source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HousingRef {
    Id(HousingId),
    ExternalKey(String),
}

impl HousingRef {
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim();
        if key.is_empty() {
            return None;
        }
        match key.parse::<HousingId>() {
            Ok(id) => Some(Self::Id(id)),
            Err(_) => Some(Self::ExternalKey(key.to_string())),
        }
    }
}

impl fmt::Display for HousingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => id.fmt(f),
            Self::ExternalKey(key) => f.write_str(key),
        }
    }
}
