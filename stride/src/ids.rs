//! Opaque identifiers minted by the runtime.
//!
//! Each id is a thin newtype over a UUID-v4 string so that ids from
//! different namespaces cannot be confused at the type level while still
//! serializing as plain strings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh random id.
            #[must_use]
            pub fn fresh() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// View the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_type! {
    /// Identifier of one turn in an agent's history.
    TurnId
}

id_type! {
    /// Identifier of one tool invocation.
    CallId
}

id_type! {
    /// Identifier of one thought node in a reasoning tree.
    NodeId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_unique() {
        assert_ne!(TurnId::fresh(), TurnId::fresh());
        assert_ne!(CallId::fresh(), CallId::fresh());
    }

    #[test]
    fn serializes_transparently() {
        let id = CallId::from("call_1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""call_1""#);
        let back: CallId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_matches_inner() {
        let id = NodeId::from("node_a");
        assert_eq!(id.to_string(), "node_a");
        assert_eq!(id.as_str(), "node_a");
    }
}
