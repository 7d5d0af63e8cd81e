use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::{RecordId, sql::Datetime};

/// Persisted local identity for a real-world principal.
///
/// Created lazily on first successful session verification and never deleted
/// by this subsystem. Sessions, grants and audit rows all reference back to
/// this record; nothing owns it except the session validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Stable database identifier (table: `identity`).
    pub id: RecordId,
    /// Opaque user identifier from the external provider (unique).
    pub external_id: String,
    /// Primary email reported by the provider profile (unique).
    pub email: String,
    /// Optional display name from the provider profile.
    pub display_name: Option<String>,
    /// When this record was first created.
    pub created_at: Option<Datetime>,
    /// When this record was last updated.
    pub updated_at: Option<Datetime>,
}

/// Payload used when inserting a new identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityCreate {
    pub external_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

/// Persisted record of one verified login event.
///
/// At most one row exists per provider session id; re-validating the same
/// assertion touches `last_used_at` in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Stable database identifier (table: `session`).
    pub id: RecordId,
    /// Owning identity.
    pub identity_id: RecordId,
    /// Provider's canonical session identifier (unique).
    pub provider_session_id: String,
    /// SHA-256 hash of the bearer token presented at creation time.
    pub token_hash: String,
    /// When the session lease ends; past-expiry rows are sweep-eligible.
    pub expires_at: Datetime,
    /// Last time this session was successfully re-validated.
    pub last_used_at: Datetime,
    /// When this record was first created.
    pub created_at: Option<Datetime>,
}

/// Kind of capability a permission gates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionCategory {
    /// Tool invocation
    Tool,
    /// Resource read
    Resource,
    /// Prompt retrieval
    Prompt,
}

impl PermissionCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Prompt => "prompt",
        }
    }
}

/// Persisted capability grant definition.
///
/// Upserted by name the first time it is needed and never mutated after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRecord {
    /// Stable database identifier (table: `permission`).
    pub id: RecordId,
    /// Unique dotted name, e.g. "tools.create-user" or "tools.*".
    pub name: String,
    /// Capability kind this permission gates.
    pub category: PermissionCategory,
    /// Human description shown in administrative listings.
    pub description: String,
    /// When this record was first created.
    pub created_at: Option<Datetime>,
}

/// Persisted association between one identity and one permission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrantRecord {
    /// Stable database identifier (table: `permission_grant`).
    pub id: RecordId,
    /// Identity holding the grant.
    pub identity_id: RecordId,
    /// Dotted name of the granted permission.
    pub permission: String,
    /// Who or what granted it (e.g. "system").
    pub granted_by: String,
    /// When the grant was made.
    pub created_at: Option<Datetime>,
}

/// Persisted audit log entry: one gated operation attempt and its outcome.
///
/// Append-only. Rows are never updated or deleted here; retention is an
/// operational concern outside this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogRecord {
    /// Stable database identifier (table: `audit_log`).
    pub id: RecordId,
    /// Identity that attempted the action.
    pub identity_id: RecordId,
    /// Dotted action name, e.g. "tool.create-user" or "resource.users.read".
    pub action: String,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Optional resource identifier (e.g. a URI).
    pub resource: Option<String>,
    /// Optional error message for failed attempts.
    pub error_message: Option<String>,
    /// Optional sanitized metadata blob.
    pub metadata: Option<Value>,
    /// Client network address, if known.
    pub client_address: Option<String>,
    /// Client user agent, if known.
    pub client_agent: Option<String>,
    /// When the attempt happened.
    pub created_at: Option<Datetime>,
}

/// Persisted demo directory user, managed by the guarded tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppUserRecord {
    /// Stable database identifier (table: `app_user`).
    pub id: RecordId,
    /// Full name.
    pub name: String,
    /// Email address (unique).
    pub email: String,
    /// When this user was created.
    pub created_at: Option<Datetime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_category_as_str() {
        assert_eq!(PermissionCategory::Tool.as_str(), "tool");
        assert_eq!(PermissionCategory::Resource.as_str(), "resource");
        assert_eq!(PermissionCategory::Prompt.as_str(), "prompt");
    }

    #[test]
    fn test_permission_category_serde() {
        let json = serde_json::to_string(&PermissionCategory::Resource).unwrap();
        assert_eq!(json, "\"resource\"");

        let parsed: PermissionCategory = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(parsed, PermissionCategory::Tool);
    }

    #[test]
    fn test_audit_log_record_serializes_flat() {
        let entry = AuditLogRecord {
            id: RecordId::from_table_key("audit_log", "1"),
            identity_id: RecordId::from_table_key("identity", "abc"),
            action: "tool.create-user".to_string(),
            success: true,
            resource: None,
            error_message: None,
            metadata: Some(serde_json::json!({"name": "Ada"})),
            client_address: Some("127.0.0.1".to_string()),
            client_agent: None,
            created_at: None,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "tool.create-user");
        assert_eq!(json["success"], true);
        assert_eq!(json["metadata"]["name"], "Ada");
    }
}
