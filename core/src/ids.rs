//! Identifier newtypes.
//!
//! Every id is a thin wrapper around `String` so that an item id can never be
//! passed where a seat id is expected. The wrappers serialize transparently.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an id from anything string-like.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the id and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// A sellable item (a ticket tier) tracked by the stock ledger.
    ItemId
);

string_id!(
    /// A physical seat in a venue layout.
    SeatId
);

string_id!(
    /// A single performance of a show. Seat locks are scoped to a session.
    SessionId
);

string_id!(
    /// The venue a session takes place in.
    VenueId
);

string_id!(
    /// Whoever holds a lock or reservation, usually a user id.
    ///
    /// Owner ids may contain `:`; the seat cache encoding splits on the last one.
    OwnerId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_inner_value() {
        let item = ItemId::new("T1");
        assert_eq!(item.to_string(), "T1");
        assert_eq!(item.as_str(), "T1");
    }

    #[test]
    fn serializes_transparently() {
        let seat = SeatId::from("A-12");
        let json = serde_json::to_string(&seat).unwrap_or_default();
        assert_eq!(json, "\"A-12\"");
    }
}
