//! Tamper-evident activity recording.
//!
//! Every gated operation attempt lands here, success or failure. The recorder
//! never raises to its caller: an audit-logging outage must not block the
//! operation being audited from completing or from reporting its own outcome.

use serde_json::Value;
use surrealdb::RecordId;
use tracing::error;

use crate::db::Db;
use crate::db::schema::AuditLogRecord;

/// Maximum nesting depth retained in audit metadata.
///
/// Caller-supplied metadata is arbitrary; subtrees deeper than this are
/// dropped during sanitization so only bounded, storable data reaches the
/// audit table.
pub const MAX_METADATA_DEPTH: u32 = 8;

/// Optional fields attached to an audit record.
#[derive(Debug, Clone, Default)]
pub struct AuditDetails {
    /// Resource identifier the action touched (e.g. a URI).
    pub resource: Option<String>,
    /// Error message for failed attempts.
    pub error_message: Option<String>,
    /// Arbitrary caller metadata; sanitized before persistence.
    pub metadata: Option<Value>,
    /// Client network address.
    pub client_address: Option<String>,
    /// Client user agent.
    pub client_agent: Option<String>,
}

/// Sanitize caller metadata before persistence.
///
/// Primitives pass through unchanged. Sequences and mappings recurse with a
/// shrinking depth budget; an entry or key whose subtree exhausts the budget
/// is dropped while its siblings are preserved.
pub fn sanitize_metadata(value: Value) -> Option<Value> {
    sanitize_value(value, MAX_METADATA_DEPTH)
}

fn sanitize_value(value: Value, depth: u32) -> Option<Value> {
    if depth == 0 {
        return None;
    }
    match value {
        Value::Array(items) => Some(Value::Array(
            items
                .into_iter()
                .filter_map(|v| sanitize_value(v, depth - 1))
                .collect(),
        )),
        Value::Object(map) => Some(Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| sanitize_value(v, depth - 1).map(|v| (k, v)))
                .collect(),
        )),
        primitive => Some(primitive),
    }
}

/// Appends and queries audit log rows.
pub struct AuditRecorder {
    db: Db,
}

impl AuditRecorder {
    /// Create a new audit recorder.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Append one audit record describing an operation attempt.
    ///
    /// Write failures are reported to the operational log and swallowed;
    /// callers can treat this as infallible.
    pub async fn record(
        &self,
        identity_id: &RecordId,
        action: &str,
        success: bool,
        details: AuditDetails,
    ) {
        let metadata = details.metadata.and_then(sanitize_metadata).map(|v| {
            // The metadata column is an object; scalar blobs get a wrapper key
            if v.is_object() {
                v
            } else {
                serde_json::json!({ "value": v })
            }
        });

        let query = r#"
            CREATE audit_log CONTENT {
                identity_id: $identity_id,
                action: $action,
                success: $success,
                resource: $resource,
                error_message: $error_message,
                metadata: $metadata,
                client_address: $client_address,
                client_agent: $client_agent
            }
        "#;

        let result = self
            .db
            .query(query)
            .bind(("identity_id", identity_id.clone()))
            .bind(("action", action.to_string()))
            .bind(("success", success))
            .bind(("resource", details.resource))
            .bind(("error_message", details.error_message))
            .bind(("metadata", metadata))
            .bind(("client_address", details.client_address))
            .bind(("client_agent", details.client_agent))
            .await
            .and_then(|r| r.check());

        if let Err(e) = result {
            error!(
                action = action,
                identity_id = %identity_id,
                "Failed to write audit record: {}",
                e
            );
        }
    }

    /// Fetch recent audit records for one identity, newest first.
    pub async fn list_for_identity(
        &self,
        identity_id: &RecordId,
        limit: u32,
    ) -> anyhow::Result<Vec<AuditLogRecord>> {
        let query = r#"
            SELECT * FROM audit_log
            WHERE identity_id = $identity_id
            ORDER BY created_at DESC
            LIMIT $limit
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("identity_id", identity_id.clone()))
            .bind(("limit", limit))
            .await?;

        let records: Vec<AuditLogRecord> = res.take(0)?;
        Ok(records)
    }

    /// Fetch recent audit records across all identities, newest first.
    pub async fn list_recent(&self, limit: u32) -> anyhow::Result<Vec<AuditLogRecord>> {
        let query = r#"
            SELECT * FROM audit_log
            ORDER BY created_at DESC
            LIMIT $limit
        "#;

        let mut res = self.db.query(query).bind(("limit", limit)).await?;

        let records: Vec<AuditLogRecord> = res.take(0)?;
        Ok(records)
    }
}
