//! Typed identifiers for campaign records.
//!
//! Newtypes over UUIDs so ids of different record kinds cannot be mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.to_string()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s.trim())?))
            }
        }
    };
}

define_id!(
    /// Identifies a campaign (the aggregate root).
    CampaignId
);
define_id!(
    /// Identifies a player character.
    PlayerId
);
define_id!(
    /// Identifies a world entity (NPC, location, group, object).
    EntityId
);
define_id!(
    /// Identifies an act record.
    ActId
);
define_id!(
    /// Identifies a logged message.
    MessageId
);
define_id!(
    /// Identifies the holder of a speaking lease.
    LeaseOwner
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(EntityId::new(), EntityId::new());
    }

    #[test]
    fn test_parse_round_trip() {
        let id = CampaignId::new();
        let parsed: CampaignId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(" not-a-uuid ".parse::<CampaignId>().is_err());
    }

    #[test]
    fn test_debug_is_short() {
        let id = MessageId::new();
        let debug = format!("{id:?}");
        assert!(debug.starts_with("MessageId("));
        assert_eq!(debug.len(), "MessageId(".len() + 8 + 1);
    }
}
