//! NewType wrappers for strong typing throughout the server.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a provider session id where a provider user id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
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

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Canonical user identifier reported by the external identity provider.
    ///
    /// Opaque to this server. It is the key that ties a local identity record
    /// back to the provider, and it is unique per provider account.
    ProviderUserId
);

newtype_string!(
    /// Canonical session identifier reported by the external identity provider.
    ///
    /// One local session row exists per provider session id regardless of how
    /// many times the same assertion is re-validated.
    ProviderSessionId
);

newtype_string!(
    /// Opaque bearer assertion proving a completed login.
    ///
    /// Issued by the external identity provider and presented by the client on
    /// every request. Never persisted raw; sessions store a `TokenHash`.
    SessionToken
);

newtype_string!(
    /// SHA-256 hash of a session token for storage and correlation.
    ///
    /// Raw tokens never reach the database. The hash is computed once when the
    /// session row is created.
    TokenHash
);
