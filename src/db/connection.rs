use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "userdir".to_string()),
            database: env::var("SURREALDB_DATABASE").unwrap_or_else(|_| "main".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    // Use the specified namespace and database
    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

/// Classify a SurrealDB error as a unique-index conflict.
///
/// Uniqueness of provider user ids, provider session ids, permission names and
/// emails is enforced by the indexes below rather than in application logic,
/// so concurrent writers need to tell "row already exists" apart from every
/// other storage failure.
pub fn is_unique_violation(err: &surrealdb::Error) -> bool {
    err.to_string().contains("already contains")
}

pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = vec![
        // Local identity records, provisioned lazily on first verified login
        "DEFINE TABLE identity SCHEMAFULL;
         DEFINE FIELD external_id ON TABLE identity TYPE string;
         DEFINE FIELD email ON TABLE identity TYPE string;
         DEFINE FIELD display_name ON TABLE identity TYPE option<string>;
         DEFINE FIELD created_at ON TABLE identity VALUE time::now();
         DEFINE FIELD updated_at ON TABLE identity VALUE time::now();",
        // One row per provider session; re-validation touches, never duplicates
        "DEFINE TABLE session SCHEMAFULL;
         DEFINE FIELD identity_id ON TABLE session TYPE record<identity>;
         DEFINE FIELD provider_session_id ON TABLE session TYPE string;
         DEFINE FIELD token_hash ON TABLE session TYPE string;
         DEFINE FIELD expires_at ON TABLE session TYPE datetime;
         DEFINE FIELD last_used_at ON TABLE session TYPE datetime;
         DEFINE FIELD created_at ON TABLE session TYPE datetime DEFAULT time::now();",
        // Capability grant definitions, upserted by name and never mutated
        "DEFINE TABLE permission SCHEMAFULL;
         DEFINE FIELD name ON TABLE permission TYPE string;
         DEFINE FIELD category ON TABLE permission TYPE string;
         DEFINE FIELD description ON TABLE permission TYPE string;
         DEFINE FIELD created_at ON TABLE permission VALUE time::now();",
        // Identity <-> permission association rows
        "DEFINE TABLE permission_grant SCHEMAFULL;
         DEFINE FIELD identity_id ON TABLE permission_grant TYPE record<identity>;
         DEFINE FIELD permission ON TABLE permission_grant TYPE string;
         DEFINE FIELD granted_by ON TABLE permission_grant TYPE string;
         DEFINE FIELD created_at ON TABLE permission_grant VALUE time::now();",
        // Append-only activity trail; retention is an operational concern
        "DEFINE TABLE audit_log SCHEMAFULL;
         DEFINE FIELD identity_id ON TABLE audit_log TYPE record<identity>;
         DEFINE FIELD action ON TABLE audit_log TYPE string;
         DEFINE FIELD success ON TABLE audit_log TYPE bool;
         DEFINE FIELD resource ON TABLE audit_log TYPE option<string>;
         DEFINE FIELD error_message ON TABLE audit_log TYPE option<string>;
         DEFINE FIELD metadata ON TABLE audit_log FLEXIBLE TYPE option<object>;
         DEFINE FIELD client_address ON TABLE audit_log TYPE option<string>;
         DEFINE FIELD client_agent ON TABLE audit_log TYPE option<string>;
         DEFINE FIELD created_at ON TABLE audit_log VALUE time::now();",
        // Demo user directory managed by the guarded tools
        "DEFINE TABLE app_user SCHEMAFULL;
         DEFINE FIELD name ON TABLE app_user TYPE string;
         DEFINE FIELD email ON TABLE app_user TYPE string;
         DEFINE FIELD created_at ON TABLE app_user VALUE time::now();",
        // Unique indexes: the storage layer, not the application, arbitrates
        // the provisioning races between concurrent first logins
        "DEFINE INDEX identity_external_id ON TABLE identity COLUMNS external_id UNIQUE;
         DEFINE INDEX identity_email ON TABLE identity COLUMNS email UNIQUE;
         DEFINE INDEX session_provider_id ON TABLE session COLUMNS provider_session_id UNIQUE;
         DEFINE INDEX permission_name ON TABLE permission COLUMNS name UNIQUE;
         DEFINE INDEX app_user_email ON TABLE app_user COLUMNS email UNIQUE;
         DEFINE INDEX grant_identity ON TABLE permission_grant COLUMNS identity_id;
         DEFINE INDEX audit_identity ON TABLE audit_log COLUMNS identity_id;",
    ];

    for query in schema_queries {
        db.query(query).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> Db {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let db = setup_test_db().await;
        // A second pass over the same definitions must not fail
        ensure_schema(&db).await.unwrap();
    }

    #[tokio::test]
    async fn test_unique_index_rejects_duplicate_external_id() {
        let db = setup_test_db().await;

        db.query("CREATE identity CONTENT { external_id: 'u1', email: 'a@example.com' }")
            .await
            .unwrap()
            .check()
            .unwrap();

        let err = db
            .query("CREATE identity CONTENT { external_id: 'u1', email: 'b@example.com' }")
            .await
            .unwrap()
            .check()
            .unwrap_err();

        assert!(is_unique_violation(&err), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_other_errors_are_not_unique_violations() {
        let db = setup_test_db().await;

        // Missing required field on a SCHEMAFULL table
        let err = db
            .query("CREATE identity CONTENT { external_id: 'u2' }")
            .await
            .unwrap()
            .check()
            .unwrap_err();

        assert!(!is_unique_violation(&err));
    }
}
