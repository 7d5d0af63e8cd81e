//! External identity provider interface.
//!
//! The provider owns login (magic-link delivery, session issuance) entirely;
//! this server only consumes two calls: live verification of a bearer
//! assertion and a profile fetch for first-contact provisioning.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::types::{ProviderSessionId, ProviderUserId};

/// Result of a successful session verification at the provider.
#[derive(Debug, Clone)]
pub struct SessionVerification {
    /// Provider's canonical user identifier.
    pub provider_user_id: ProviderUserId,
    /// Provider's canonical session identifier.
    pub provider_session_id: ProviderSessionId,
    /// Provider-reported session expiry, if any.
    pub expires_at: Option<DateTime<Utc>>,
}

/// User profile as reported by the provider.
#[derive(Debug, Clone)]
pub struct UserProfile {
    /// Email addresses on the account, primary first.
    pub emails: Vec<String>,
    /// First name, if the account has one.
    pub first_name: Option<String>,
}

impl UserProfile {
    /// The provider's primary email for the account.
    pub fn primary_email(&self) -> Option<&str> {
        self.emails.first().map(|s| s.as_str())
    }
}

/// Errors surfaced by the identity provider collaborator.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// The provider rejected the assertion (expired, malformed, revoked).
    Rejected(String),
    /// The provider could not be reached or returned an unusable response.
    Transport(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "Session rejected by provider: {}", reason),
            Self::Transport(msg) => write!(f, "Provider unreachable: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Collaborator seam for the external identity provider.
///
/// Implementations must treat `verify_session` as the sole authority on
/// whether an assertion is live; no local expiry checks are layered on top.
pub trait IdentityProvider: Send + Sync {
    /// Verify a bearer assertion and return its canonical identifiers.
    fn verify_session(
        &self,
        assertion: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SessionVerification, ProviderError>> + Send + '_>>;

    /// Fetch the profile for a provider user id.
    fn get_user_profile(
        &self,
        provider_user_id: &ProviderUserId,
    ) -> Pin<Box<dyn Future<Output = Result<UserProfile, ProviderError>> + Send + '_>>;
}

// Wire shapes for the HTTP provider.

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    user_id: String,
    session_id: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ProfileEmail {
    email: String,
}

#[derive(Debug, Deserialize)]
struct ProfileName {
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    #[serde(default)]
    emails: Vec<ProfileEmail>,
    #[serde(default)]
    name: Option<ProfileName>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error_message: Option<String>,
}

/// HTTP implementation of the provider seam.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    project_secret: String,
}

impl HttpIdentityProvider {
    /// Create a provider client from configuration.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project_secret: config.project_secret.clone(),
        }
    }

    async fn rejection_reason(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<ErrorResponse>().await {
            Ok(body) => body
                .error_message
                .unwrap_or_else(|| format!("provider returned {}", status)),
            Err(_) => format!("provider returned {}", status),
        }
    }
}

impl IdentityProvider for HttpIdentityProvider {
    fn verify_session(
        &self,
        assertion: &str,
    ) -> Pin<Box<dyn Future<Output = Result<SessionVerification, ProviderError>> + Send + '_>> {
        let assertion = assertion.to_string();
        Box::pin(async move {
            let response = self
                .client
                .post(format!("{}/sessions/verify", self.base_url))
                .header("X-Project-Secret", &self.project_secret)
                .json(&serde_json::json!({ "session_token": assertion }))
                .send()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;

            if response.status().is_client_error() {
                let reason = Self::rejection_reason(response).await;
                return Err(ProviderError::Rejected(reason));
            }
            if !response.status().is_success() {
                return Err(ProviderError::Transport(format!(
                    "provider returned {}",
                    response.status()
                )));
            }

            let body: VerifyResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;

            debug!(user_id = %body.user_id, "Session verified by provider");

            Ok(SessionVerification {
                provider_user_id: ProviderUserId::new(body.user_id),
                provider_session_id: ProviderSessionId::new(body.session_id),
                expires_at: body.expires_at,
            })
        })
    }

    fn get_user_profile(
        &self,
        provider_user_id: &ProviderUserId,
    ) -> Pin<Box<dyn Future<Output = Result<UserProfile, ProviderError>> + Send + '_>> {
        let user_id = provider_user_id.clone();
        Box::pin(async move {
            let response = self
                .client
                .get(format!("{}/users/{}", self.base_url, user_id))
                .header("X-Project-Secret", &self.project_secret)
                .send()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;

            if response.status().is_client_error() {
                let reason = Self::rejection_reason(response).await;
                return Err(ProviderError::Rejected(reason));
            }
            if !response.status().is_success() {
                return Err(ProviderError::Transport(format!(
                    "provider returned {}",
                    response.status()
                )));
            }

            let body: ProfileResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;

            Ok(UserProfile {
                emails: body.emails.into_iter().map(|e| e.email).collect(),
                first_name: body.name.and_then(|n| n.first_name),
            })
        })
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockIdentityProvider;
    use super::*;

    #[test]
    fn test_provider_error_display() {
        assert_eq!(
            ProviderError::Rejected("expired".to_string()).to_string(),
            "Session rejected by provider: expired"
        );
        assert_eq!(
            ProviderError::Transport("timeout".to_string()).to_string(),
            "Provider unreachable: timeout"
        );
    }

    #[test]
    fn test_primary_email() {
        let profile = UserProfile {
            emails: vec!["first@example.com".to_string(), "second@example.com".to_string()],
            first_name: None,
        };
        assert_eq!(profile.primary_email(), Some("first@example.com"));

        let empty = UserProfile {
            emails: vec![],
            first_name: None,
        };
        assert!(empty.primary_email().is_none());
    }

    #[test]
    fn test_verify_response_deserialization() {
        let json = r#"{
            "user_id": "user-1",
            "session_id": "session-1",
            "expires_at": "2026-01-01T00:00:00Z"
        }"#;

        let parsed: VerifyResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.user_id, "user-1");
        assert_eq!(parsed.session_id, "session-1");
        assert!(parsed.expires_at.is_some());
    }

    #[test]
    fn test_verify_response_without_expiry() {
        let json = r#"{"user_id": "u", "session_id": "s"}"#;
        let parsed: VerifyResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.expires_at.is_none());
    }

    #[test]
    fn test_profile_response_deserialization() {
        let json = r#"{
            "emails": [{"email": "ada@example.com"}],
            "name": {"first_name": "Ada"}
        }"#;

        let parsed: ProfileResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.emails[0].email, "ada@example.com");
        assert_eq!(parsed.name.unwrap().first_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_mock_provider_round_trip() {
        let provider = MockIdentityProvider::new();
        provider.register_session("tok", "user-1", "session-1", None);
        provider.register_profile("user-1", "ada@example.com", Some("Ada"));

        let verification = provider.verify_session("tok").await.unwrap();
        assert_eq!(verification.provider_user_id.as_str(), "user-1");

        let profile = provider
            .get_user_profile(&verification.provider_user_id)
            .await
            .unwrap();
        assert_eq!(profile.primary_email(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn test_mock_provider_rejects_unknown_token() {
        let provider = MockIdentityProvider::new();
        let err = provider.verify_session("nope").await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }
}
