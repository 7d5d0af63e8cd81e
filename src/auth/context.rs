//! Auth context for request-scoped identity and capability data.

use crate::db::schema::IdentityRecord;
use crate::types::SessionToken;
use std::collections::HashSet;
use surrealdb::RecordId;

/// The resolved identity/permissions/session bundle for one validated call.
///
/// Produced by `SessionValidator::validate` and passed explicitly into every
/// guard invocation; there is no ambient per-process context, so concurrent
/// requests for different users cannot leak into each other.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The verified local identity.
    identity: IdentityRecord,
    /// Dotted permission names currently granted to the identity.
    permissions: HashSet<String>,
    /// Local session row backing this validation.
    session_id: RecordId,
    /// The raw bearer token that was validated.
    token: SessionToken,
    /// Client network address (for audit logging).
    client_address: Option<String>,
    /// Client user agent (for audit logging).
    client_agent: Option<String>,
}

impl AuthContext {
    /// Create a new auth context.
    pub fn new(
        identity: IdentityRecord,
        permissions: HashSet<String>,
        session_id: RecordId,
        token: SessionToken,
    ) -> Self {
        Self {
            identity,
            permissions,
            session_id,
            token,
            client_address: None,
            client_agent: None,
        }
    }

    /// Attach client provenance for audit logging.
    pub fn with_client_info(
        mut self,
        client_address: Option<String>,
        client_agent: Option<String>,
    ) -> Self {
        self.client_address = client_address;
        self.client_agent = client_agent;
        self
    }

    /// Get the verified identity record.
    pub fn identity(&self) -> &IdentityRecord {
        &self.identity
    }

    /// Get the identity's database id.
    pub fn identity_id(&self) -> &RecordId {
        &self.identity.id
    }

    /// Get the granted permission name set.
    pub fn permissions(&self) -> &HashSet<String> {
        &self.permissions
    }

    /// Get the local session id.
    pub fn session_id(&self) -> &RecordId {
        &self.session_id
    }

    /// Get the raw bearer token this context was validated from.
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Get the client network address, if known.
    pub fn client_address(&self) -> Option<&str> {
        self.client_address.as_deref()
    }

    /// Get the client user agent, if known.
    pub fn client_agent(&self) -> Option<&str> {
        self.client_agent.as_deref()
    }

    /// Get a display-friendly name for this identity.
    pub fn display(&self) -> String {
        if let Some(name) = &self.identity.display_name {
            name.clone()
        } else {
            self.identity.email.clone()
        }
    }
}
