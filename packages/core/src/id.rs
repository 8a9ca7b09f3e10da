//! ULID-backed identifiers for persisted records.

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Create a new unique ID.
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Parse an ID from its string form.
            pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
                Ok(Self(Ulid::from_string(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

use serde::{Deserialize, Serialize};
use ulid::Ulid;

ulid_id!(
    /// Unique identifier for a job, using ULID for chronological sorting.
    JobId
);

ulid_id!(
    /// Unique identifier for an uploaded image.
    ImageId
);

ulid_id!(
    /// Unique identifier for a derived thumbnail.
    ThumbnailId
);
