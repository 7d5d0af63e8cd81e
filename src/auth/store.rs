//! Identity, session and permission persistence.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use surrealdb::RecordId;
use surrealdb::sql::Datetime;

use crate::auth::permissions::DEFAULT_GRANTS;
use crate::db::schema::{
    IdentityCreate, IdentityRecord, PermissionCategory, PermissionGrantRecord, SessionRecord,
};
use crate::db::{Db, is_unique_violation};
use crate::types::{ProviderSessionId, ProviderUserId, TokenHash};

/// Hash a session token for storage and correlation (raw tokens never reach
/// the database).
pub fn hash_session_token(token: &str) -> TokenHash {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    TokenHash::new(format!("{:x}", result))
}

/// Store for identity, session and grant records.
///
/// All uniqueness invariants are enforced by the database indexes; this store
/// resolves conflicts by re-fetching, never by locking.
pub struct IdentityStore {
    db: Db,
}

impl IdentityStore {
    /// Create a new identity store.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Find a local identity by provider user id.
    pub async fn find_identity(
        &self,
        external_id: &ProviderUserId,
    ) -> Result<Option<IdentityRecord>> {
        let external_id = external_id.as_str().to_string();

        let query = r#"
            SELECT * FROM identity
            WHERE external_id = $external_id
            LIMIT 1
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("external_id", external_id))
            .await?;

        let identities: Vec<IdentityRecord> = res.take(0)?;
        Ok(identities.into_iter().next())
    }

    /// Create a local identity, or fetch the row a concurrent first login
    /// already created.
    ///
    /// Returns the record and whether this call created it. Two callers racing
    /// through the absent-identity path both end up with the same row; only
    /// the winner of the unique index sees `true`.
    pub async fn create_or_fetch_identity(
        &self,
        create: IdentityCreate,
    ) -> Result<(IdentityRecord, bool)> {
        let external_id = create.external_id.clone();

        let query = r#"
            CREATE identity CONTENT {
                external_id: $external_id,
                email: $email,
                display_name: $display_name
            }
        "#;

        let created: Result<Vec<IdentityRecord>, surrealdb::Error> = async {
            let mut res = self
                .db
                .query(query)
                .bind(("external_id", create.external_id))
                .bind(("email", create.email))
                .bind(("display_name", create.display_name))
                .await?;
            res.take(0)
        }
        .await;

        match created {
            Ok(identities) => {
                let identity = identities
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Failed to create identity"))?;
                Ok((identity, true))
            }
            Err(e) if is_unique_violation(&e) => {
                let identity = self
                    .find_identity(&ProviderUserId::new(external_id))
                    .await?
                    .ok_or_else(|| {
                        anyhow::anyhow!("Identity vanished after unique-index conflict")
                    })?;
                Ok((identity, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Find a session by provider session id.
    pub async fn find_session(
        &self,
        provider_session_id: &ProviderSessionId,
    ) -> Result<Option<SessionRecord>> {
        let provider_session_id = provider_session_id.as_str().to_string();

        let query = r#"
            SELECT * FROM session
            WHERE provider_session_id = $provider_session_id
            LIMIT 1
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("provider_session_id", provider_session_id))
            .await?;

        let sessions: Vec<SessionRecord> = res.take(0)?;
        Ok(sessions.into_iter().next())
    }

    /// Update a session's last-used timestamp in place.
    ///
    /// Returns the touched row, or `None` when no session exists for the
    /// provider session id.
    pub async fn touch_session(
        &self,
        provider_session_id: &ProviderSessionId,
    ) -> Result<Option<SessionRecord>> {
        let provider_session_id = provider_session_id.as_str().to_string();

        let query = r#"
            UPDATE session SET last_used_at = time::now()
            WHERE provider_session_id = $provider_session_id
            RETURN AFTER
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("provider_session_id", provider_session_id))
            .await?;

        let sessions: Vec<SessionRecord> = res.take(0)?;
        Ok(sessions.into_iter().next())
    }

    /// Create a session row for the first verification of a provider session.
    ///
    /// A concurrent validation of the same assertion may win the unique index;
    /// that conflict degrades to a touch of the existing row.
    pub async fn create_session(
        &self,
        identity_id: &RecordId,
        provider_session_id: &ProviderSessionId,
        token_hash: &TokenHash,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let query = r#"
            CREATE session CONTENT {
                identity_id: $identity_id,
                provider_session_id: $provider_session_id,
                token_hash: $token_hash,
                expires_at: $expires_at,
                last_used_at: time::now()
            }
        "#;

        let created: Result<Vec<SessionRecord>, surrealdb::Error> = async {
            let mut res = self
                .db
                .query(query)
                .bind(("identity_id", identity_id.clone()))
                .bind((
                    "provider_session_id",
                    provider_session_id.as_str().to_string(),
                ))
                .bind(("token_hash", token_hash.as_str().to_string()))
                .bind(("expires_at", Datetime::from(expires_at)))
                .await?;
            res.take(0)
        }
        .await;

        match created {
            Ok(sessions) => sessions
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("Failed to create session")),
            Err(e) if is_unique_violation(&e) => self
                .touch_session(provider_session_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Session vanished after unique-index conflict")),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert a permission definition by name.
    ///
    /// The record key is derived from the name, so concurrent upserts of the
    /// same permission settle on one row without a conflict.
    pub async fn ensure_permission(
        &self,
        name: &str,
        category: PermissionCategory,
        description: &str,
    ) -> Result<()> {
        let query = r#"
            UPSERT type::thing('permission', $name) CONTENT {
                name: $name,
                category: $category,
                description: $description
            }
        "#;

        self.db
            .query(query)
            .bind(("name", name.to_string()))
            .bind(("category", category.as_str().to_string()))
            .bind(("description", description.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Insert a grant row associating an identity with a permission.
    pub async fn grant_permission(
        &self,
        identity_id: &RecordId,
        permission: &str,
        granted_by: &str,
    ) -> Result<()> {
        let query = r#"
            CREATE permission_grant CONTENT {
                identity_id: $identity_id,
                permission: $permission,
                granted_by: $granted_by
            }
        "#;

        self.db
            .query(query)
            .bind(("identity_id", identity_id.clone()))
            .bind(("permission", permission.to_string()))
            .bind(("granted_by", granted_by.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Provision the fixed default grant set for a freshly created identity.
    ///
    /// Each permission definition is upserted before its grant row is
    /// inserted, so a concurrent first login for a different identity can
    /// never trip the permission name index.
    pub async fn provision_default_grants(&self, identity_id: &RecordId) -> Result<()> {
        for (name, category, description) in DEFAULT_GRANTS {
            self.ensure_permission(name, *category, description).await?;
            self.grant_permission(identity_id, name, "system").await?;
        }
        Ok(())
    }

    /// Load the identity's current grant names. Read fresh on every
    /// validation so revocations apply on the next call.
    pub async fn load_grant_names(&self, identity_id: &RecordId) -> Result<HashSet<String>> {
        let query = r#"
            SELECT * FROM permission_grant
            WHERE identity_id = $identity_id
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("identity_id", identity_id.clone()))
            .await?;

        let grants: Vec<PermissionGrantRecord> = res.take(0)?;
        Ok(grants.into_iter().map(|g| g.permission).collect())
    }

    /// Delete every session whose expiry is strictly in the past.
    ///
    /// Returns the number of rows removed. Expiry is not enforced on read;
    /// this sweep is the only local consumer of the expiry field.
    pub async fn sweep_expired_sessions(&self) -> Result<usize> {
        let query = r#"
            DELETE session
            WHERE expires_at < time::now()
            RETURN BEFORE
        "#;

        let mut res = self.db.query(query).await?;
        let removed: Vec<SessionRecord> = res.take(0)?;
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};
    use chrono::Duration;
    use std::sync::Arc;

    async fn setup_store() -> IdentityStore {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();
        IdentityStore::new(db)
    }

    fn identity_create(external_id: &str, email: &str) -> IdentityCreate {
        IdentityCreate {
            external_id: external_id.to_string(),
            email: email.to_string(),
            display_name: Some("Test".to_string()),
        }
    }

    #[test]
    fn test_hash_session_token() {
        let h1 = hash_session_token("token-a");
        let h2 = hash_session_token("token-a");
        let h3 = hash_session_token("token-b");

        assert!(h1.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[tokio::test]
    async fn test_create_or_fetch_creates_then_fetches() {
        let store = setup_store().await;

        let (first, created) = store
            .create_or_fetch_identity(identity_create("u1", "a@example.com"))
            .await
            .unwrap();
        assert!(created);

        // Same external id again: the unique index turns this into a fetch
        let (second, created) = store
            .create_or_fetch_identity(identity_create("u1", "a@example.com"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_concurrent_first_logins_settle_on_one_identity() {
        let store = Arc::new(setup_store().await);

        let a = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .create_or_fetch_identity(identity_create("race", "race@example.com"))
                    .await
            })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .create_or_fetch_identity(identity_create("race", "race@example.com"))
                    .await
            })
        };

        let (ra, rb) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(ra.0.id, rb.0.id);
        // Exactly one of the two may have created the row
        assert!(!(ra.1 && rb.1));
    }

    #[tokio::test]
    async fn test_session_touch_keeps_one_row() {
        let store = setup_store().await;
        let (identity, _) = store
            .create_or_fetch_identity(identity_create("u1", "a@example.com"))
            .await
            .unwrap();

        let provider_session_id = ProviderSessionId::new("sess-1");
        let token_hash = hash_session_token("tok");
        let expires = Utc::now() + Duration::hours(1);

        let first = store
            .create_session(&identity.id, &provider_session_id, &token_hash, expires)
            .await
            .unwrap();

        let touched = store
            .touch_session(&provider_session_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.id, touched.id);
        assert!(touched.last_used_at >= first.last_used_at);

        // Creating again for the same provider session degrades to a touch
        let again = store
            .create_session(&identity.id, &provider_session_id, &token_hash, expires)
            .await
            .unwrap();
        assert_eq!(first.id, again.id);
    }

    #[tokio::test]
    async fn test_touch_preserves_session_creation_time() {
        let store = setup_store().await;
        let (identity, _) = store
            .create_or_fetch_identity(identity_create("u1", "a@example.com"))
            .await
            .unwrap();

        let provider_session_id = ProviderSessionId::new("sess-1");
        let token_hash = hash_session_token("tok");
        let expires = Utc::now() + Duration::hours(1);

        let created = store
            .create_session(&identity.id, &provider_session_id, &token_hash, expires)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let touched = store
            .touch_session(&provider_session_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(created.created_at, touched.created_at);
        assert!(touched.last_used_at > touched.created_at.clone().unwrap());
    }

    #[tokio::test]
    async fn test_touch_missing_session_returns_none() {
        let store = setup_store().await;
        let touched = store
            .touch_session(&ProviderSessionId::new("missing"))
            .await
            .unwrap();
        assert!(touched.is_none());
    }

    #[tokio::test]
    async fn test_default_provisioning_grants_fixed_set() {
        let store = setup_store().await;
        let (identity, _) = store
            .create_or_fetch_identity(identity_create("u1", "a@example.com"))
            .await
            .unwrap();

        store.provision_default_grants(&identity.id).await.unwrap();

        let names = store.load_grant_names(&identity.id).await.unwrap();
        assert_eq!(names.len(), DEFAULT_GRANTS.len());
        for (name, _, _) in DEFAULT_GRANTS {
            assert!(names.contains(*name), "missing default grant {name}");
        }
    }

    #[tokio::test]
    async fn test_ensure_permission_is_idempotent() {
        let store = setup_store().await;

        store
            .ensure_permission("tools.create-user", PermissionCategory::Tool, "Create")
            .await
            .unwrap();
        store
            .ensure_permission("tools.create-user", PermissionCategory::Tool, "Create")
            .await
            .unwrap();

        let mut res = store
            .db
            .query("SELECT * FROM permission WHERE name = 'tools.create-user'")
            .await
            .unwrap();
        let rows: Vec<crate::db::schema::PermissionRecord> = res.take(0).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_strictly_expired() {
        let store = setup_store().await;
        let (identity, _) = store
            .create_or_fetch_identity(identity_create("u1", "a@example.com"))
            .await
            .unwrap();

        store
            .create_session(
                &identity.id,
                &ProviderSessionId::new("expired"),
                &hash_session_token("t1"),
                Utc::now() - Duration::minutes(5),
            )
            .await
            .unwrap();
        store
            .create_session(
                &identity.id,
                &ProviderSessionId::new("live"),
                &hash_session_token("t2"),
                Utc::now() + Duration::hours(1),
            )
            .await
            .unwrap();

        let removed = store.sweep_expired_sessions().await.unwrap();
        assert_eq!(removed, 1);

        assert!(
            store
                .find_session(&ProviderSessionId::new("expired"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .find_session(&ProviderSessionId::new("live"))
                .await
                .unwrap()
                .is_some()
        );
    }
}
