//! Session validation: bearer assertion in, auth context out.

use std::fmt;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::auth::context::AuthContext;
use crate::auth::provider::{IdentityProvider, ProviderError};
use crate::auth::store::{IdentityStore, hash_session_token};
use crate::db::schema::IdentityCreate;
use crate::types::SessionToken;

/// Authentication failures.
///
/// Everything on this path is fatal to the current request only; a permission
/// denial is a separate outcome and never appears here.
#[derive(Debug, Clone)]
pub enum AuthenticationError {
    /// The provider rejected the assertion (expired, malformed, revoked).
    Rejected(String),
    /// The provider could not be consulted.
    Provider(String),
    /// Local identity/session/permission storage failed.
    Database(String),
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "Authentication failed: {}", reason),
            Self::Provider(msg) => write!(f, "Authentication failed: provider error: {}", msg),
            Self::Database(msg) => write!(f, "Authentication failed: storage error: {}", msg),
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Exchanges opaque session assertions for verified auth contexts.
///
/// The provider's live verification is the sole authority on assertion
/// validity; locally this validator only provisions identity and session
/// rows and loads the current grant set.
pub struct SessionValidator {
    provider: Arc<dyn IdentityProvider>,
    store: IdentityStore,
    /// Session lease applied when the provider reports no expiry.
    default_session_ttl: Duration,
}

impl SessionValidator {
    /// Create a new session validator.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: IdentityStore,
        default_session_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            default_session_ttl,
        }
    }

    /// Validate a bearer assertion and resolve the caller's identity.
    ///
    /// On first contact for a provider user, the identity is created and the
    /// default grant set is provisioned exactly once. On first contact for a
    /// provider session, a session row is created; later validations of the
    /// same session only touch its last-used timestamp. The grant set is read
    /// fresh on every call.
    pub async fn validate(&self, assertion: &str) -> Result<AuthContext, AuthenticationError> {
        // 1. The provider is the sole authority on the assertion itself.
        let verification =
            self.provider
                .verify_session(assertion)
                .await
                .map_err(|e| match e {
                    ProviderError::Rejected(reason) => AuthenticationError::Rejected(reason),
                    ProviderError::Transport(msg) => AuthenticationError::Provider(msg),
                })?;

        // 2-3. Resolve or provision the local identity.
        let identity = match self
            .store
            .find_identity(&verification.provider_user_id)
            .await
            .map_err(|e| AuthenticationError::Database(e.to_string()))?
        {
            Some(identity) => identity,
            None => {
                let profile = self
                    .provider
                    .get_user_profile(&verification.provider_user_id)
                    .await
                    .map_err(|e| AuthenticationError::Provider(e.to_string()))?;

                let email = profile
                    .primary_email()
                    .ok_or_else(|| {
                        AuthenticationError::Provider("profile has no email".to_string())
                    })?
                    .to_string();

                let (identity, created) = self
                    .store
                    .create_or_fetch_identity(IdentityCreate {
                        external_id: verification.provider_user_id.as_str().to_string(),
                        email,
                        display_name: profile.first_name.clone(),
                    })
                    .await
                    .map_err(|e| AuthenticationError::Database(e.to_string()))?;

                // Only the creator provisions; the loser of a concurrent
                // first login takes the row as-is.
                if created {
                    info!(
                        identity_id = %identity.id,
                        email = %identity.email,
                        "Provisioning new identity with default grants"
                    );
                    self.store
                        .provision_default_grants(&identity.id)
                        .await
                        .map_err(|e| AuthenticationError::Database(e.to_string()))?;
                }

                identity
            }
        };

        // 4. One session row per provider session id: touch, or create.
        let session = match self
            .store
            .touch_session(&verification.provider_session_id)
            .await
            .map_err(|e| AuthenticationError::Database(e.to_string()))?
        {
            Some(session) => session,
            None => {
                let expires_at = verification
                    .expires_at
                    .unwrap_or_else(|| Utc::now() + self.default_session_ttl);
                self.store
                    .create_session(
                        &identity.id,
                        &verification.provider_session_id,
                        &hash_session_token(assertion),
                        expires_at,
                    )
                    .await
                    .map_err(|e| AuthenticationError::Database(e.to_string()))?
            }
        };

        // 5. Fresh grant read per call.
        let permissions = self
            .store
            .load_grant_names(&identity.id)
            .await
            .map_err(|e| AuthenticationError::Database(e.to_string()))?;

        debug!(
            identity_id = %identity.id,
            session_id = %session.id,
            grants = permissions.len(),
            "Session validated"
        );

        Ok(AuthContext::new(
            identity,
            permissions,
            session.id,
            SessionToken::new(assertion),
        ))
    }

    /// Access the underlying identity store.
    pub fn store(&self) -> &IdentityStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::permissions::DEFAULT_GRANTS;
    use crate::auth::provider::mock::MockIdentityProvider;
    use crate::db::{DatabaseConfig, Db, create_connection, ensure_schema};

    async fn setup_db() -> Db {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();
        db
    }

    async fn setup_validator(provider: Arc<MockIdentityProvider>) -> (SessionValidator, Db) {
        let db = setup_db().await;
        let validator = SessionValidator::new(
            provider,
            IdentityStore::new(db.clone()),
            Duration::minutes(60),
        );
        (validator, db)
    }

    fn provider_with_user(token: &str, user: &str, session: &str) -> Arc<MockIdentityProvider> {
        let provider = MockIdentityProvider::new();
        provider.register_session(token, user, session, None);
        provider.register_profile(user, &format!("{user}@example.com"), Some("Test"));
        Arc::new(provider)
    }

    async fn count(db: &Db, query: &str) -> usize {
        let mut res = db.query(query).await.unwrap();
        let rows: surrealdb::Value = res.take(0).unwrap();
        match rows.into_inner() {
            surrealdb::sql::Value::Array(rows) => rows.len(),
            surrealdb::sql::Value::None | surrealdb::sql::Value::Null => 0,
            _ => 1,
        }
    }

    #[tokio::test]
    async fn test_first_login_provisions_default_grants_once() {
        let provider = provider_with_user("tok", "u1", "s1");
        let (validator, db) = setup_validator(provider).await;

        let ctx = validator.validate("tok").await.unwrap();
        assert_eq!(ctx.permissions().len(), DEFAULT_GRANTS.len());
        for (name, _, _) in DEFAULT_GRANTS {
            assert!(ctx.permissions().contains(*name));
        }

        // Second validation must not duplicate grants
        let ctx = validator.validate("tok").await.unwrap();
        assert_eq!(ctx.permissions().len(), DEFAULT_GRANTS.len());
        assert_eq!(
            count(&db, "SELECT * FROM permission_grant").await,
            DEFAULT_GRANTS.len()
        );
        assert_eq!(count(&db, "SELECT * FROM identity").await, 1);
    }

    #[tokio::test]
    async fn test_repeat_validation_touches_one_session_row() {
        let provider = provider_with_user("tok", "u1", "s1");
        let (validator, db) = setup_validator(provider).await;

        let first = validator.validate("tok").await.unwrap();
        let second = validator.validate("tok").await.unwrap();

        assert_eq!(first.session_id(), second.session_id());
        assert_eq!(count(&db, "SELECT * FROM session").await, 1);

        let touched = validator
            .store()
            .find_session(&crate::types::ProviderSessionId::new("s1"))
            .await
            .unwrap()
            .unwrap();
        assert!(touched.last_used_at >= touched.created_at.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_assertion_mutates_nothing() {
        let provider = Arc::new(MockIdentityProvider::new());
        let (validator, db) = setup_validator(provider).await;

        let err = validator.validate("unknown").await.unwrap_err();
        assert!(matches!(err, AuthenticationError::Rejected(_)));
        assert!(err.to_string().starts_with("Authentication failed:"));

        assert_eq!(count(&db, "SELECT * FROM identity").await, 0);
        assert_eq!(count(&db, "SELECT * FROM session").await, 0);
        assert_eq!(count(&db, "SELECT * FROM permission_grant").await, 0);
    }

    #[tokio::test]
    async fn test_missing_profile_is_provider_error() {
        let provider = MockIdentityProvider::new();
        provider.register_session("tok", "u1", "s1", None);
        // No profile registered for u1
        let (validator, _db) = setup_validator(Arc::new(provider)).await;

        let err = validator.validate("tok").await.unwrap_err();
        assert!(matches!(err, AuthenticationError::Provider(_)));
    }

    #[tokio::test]
    async fn test_default_lease_applied_when_provider_omits_expiry() {
        let provider = provider_with_user("tok", "u1", "s1");
        let (validator, _db) = setup_validator(provider).await;

        validator.validate("tok").await.unwrap();

        let session = validator
            .store()
            .find_session(&crate::types::ProviderSessionId::new("s1"))
            .await
            .unwrap()
            .unwrap();

        let expires: chrono::DateTime<Utc> = session.expires_at.into();
        assert!(expires > Utc::now() + Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_provider_reported_expiry_is_used() {
        let provider = MockIdentityProvider::new();
        let reported = Utc::now() + Duration::minutes(5);
        provider.register_session("tok", "u1", "s1", Some(reported));
        provider.register_profile("u1", "u1@example.com", None);
        let (validator, _db) = setup_validator(Arc::new(provider)).await;

        validator.validate("tok").await.unwrap();

        let session = validator
            .store()
            .find_session(&crate::types::ProviderSessionId::new("s1"))
            .await
            .unwrap()
            .unwrap();

        let expires: chrono::DateTime<Utc> = session.expires_at.into();
        assert!((expires - reported).num_seconds().abs() < 2);
    }

    #[tokio::test]
    async fn test_revocation_applies_on_next_validation() {
        let provider = provider_with_user("tok", "u1", "s1");
        let (validator, db) = setup_validator(provider).await;

        let ctx = validator.validate("tok").await.unwrap();
        assert!(ctx.permissions().contains("tools.create-user"));

        db.query("DELETE permission_grant WHERE permission = 'tools.create-user'")
            .await
            .unwrap()
            .check()
            .unwrap();

        let ctx = validator.validate("tok").await.unwrap();
        assert!(!ctx.permissions().contains("tools.create-user"));
        assert_eq!(ctx.permissions().len(), DEFAULT_GRANTS.len() - 1);
    }
}
