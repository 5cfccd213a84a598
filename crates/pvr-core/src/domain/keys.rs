//! String keys that come from outside the Store (EPG, broadcast, remote servers).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

string_key!(
    /// EPG event id (scoped to the guide that produced it).
    EventId
);

string_key!(
    /// Stable identifier of a broadcast event; the Recording Cache key.
    UniqueEventId
);

string_key!(
    /// Broadcast service (channel) id.
    ServiceId
);

string_key!(
    /// Series linkage id shared by every episode of a series.
    SeriesId
);

string_key!(
    /// Whole-home recorder id.
    ServerId
);
