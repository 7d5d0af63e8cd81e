//! Authentication and authorization module.
//!
//! This module exchanges opaque bearer assertions for verified identities and
//! decides what those identities may do:
//!
//! - **Session validation**: the provider verifies the assertion; a local
//!   identity and session row are provisioned or touched as needed.
//! - **Permission resolution**: pure wildcard matching over the identity's
//!   granted permission names.
//!
//! ## Security model
//!
//! - Identity is resolved per capability call; the permission set is read
//!   fresh on every validation, so revocation takes effect on the next call.
//! - Uniqueness invariants (provider user id, provider session id, permission
//!   name) live in the storage layer, so concurrent first logins are settled
//!   by the database rather than application locks.
//! - Raw bearer tokens are never persisted; session rows carry a SHA-256 hash.
//!
//! ## Usage
//!
//! ```ignore
//! let validator = SessionValidator::new(provider, store, ttl);
//! let ctx = validator.validate("session-token-from-header").await?;
//! if can_execute_tool(ctx.permissions(), "create-user") {
//!     // run the tool
//! }
//! ```

mod context;
mod permissions;
mod provider;
mod store;
mod validator;

pub use context::AuthContext;
pub use permissions::{
    DEFAULT_GRANTS, can_access_resource, can_execute_tool, can_use_prompt, has_permission,
};
pub use provider::{
    HttpIdentityProvider, IdentityProvider, ProviderError, SessionVerification, UserProfile,
};
pub use store::{IdentityStore, hash_session_token};
pub use validator::{AuthenticationError, SessionValidator};

#[cfg(test)]
pub(crate) use provider::mock::MockIdentityProvider;
