//! MCP resources over the user directory.
//!
//! Two URIs are exposed: `users://all` (the full listing) and
//! `users://{id}/profile` (a single profile). Each maps to its own
//! permission name so listing and detail access can be granted separately.

use rmcp::model::{
    AnnotateAble, ListResourceTemplatesResult, ListResourcesResult, RawResource,
    RawResourceTemplate, ReadResourceResult, ResourceContents,
};
use serde_json::json;

use crate::directory::{DirectoryError, UserDirectory};

/// URI of the full user listing.
pub const USERS_ALL_URI: &str = "users://all";

/// Maximum URI length to prevent abuse.
const MAX_URI_LENGTH: usize = 4096;

/// Error types for resource operations.
#[derive(Debug)]
pub enum ResourceError {
    /// Resource URI not found.
    NotFound(String),
    /// Invalid URI (wrong scheme or malformed path).
    InvalidUri(String),
    /// Internal error during resource operations.
    Internal(String),
}

impl std::fmt::Display for ResourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceError::NotFound(uri) => write!(f, "Resource not found: {}", uri),
            ResourceError::InvalidUri(uri) => write!(f, "Invalid URI: {}", uri),
            ResourceError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ResourceError {}

/// What a `users://` URI points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserResourceTarget {
    /// `users://all`
    Listing,
    /// `users://{id}/profile`
    Profile(String),
}

impl UserResourceTarget {
    /// The permission short name guarding this target.
    pub fn permission_name(&self) -> &'static str {
        match self {
            Self::Listing => "users",
            Self::Profile(_) => "user-details",
        }
    }
}

/// Parse and validate a `users://` URI.
pub fn parse_uri(uri: &str) -> Result<UserResourceTarget, ResourceError> {
    if uri.is_empty() || uri.len() > MAX_URI_LENGTH || uri.contains('\0') {
        return Err(ResourceError::InvalidUri(uri.to_string()));
    }

    let Some(rest) = uri.strip_prefix("users://") else {
        return Err(ResourceError::InvalidUri(uri.to_string()));
    };

    if rest == "all" {
        return Ok(UserResourceTarget::Listing);
    }

    match rest.split_once('/') {
        Some((id, "profile")) if !id.is_empty() && !id.contains('/') => {
            Ok(UserResourceTarget::Profile(id.to_string()))
        }
        _ => Err(ResourceError::InvalidUri(uri.to_string())),
    }
}

/// Serves directory data as MCP resources.
pub struct UserResources {
    directory: UserDirectory,
}

impl UserResources {
    pub fn new(directory: UserDirectory) -> Self {
        Self { directory }
    }

    /// List the static resources this server exposes.
    pub fn list_resources(&self) -> ListResourcesResult {
        let listing = RawResource {
            uri: USERS_ALL_URI.to_string(),
            name: "users".to_string(),
            title: Some("All Users".to_string()),
            description: Some("JSON listing of every user in the directory.".to_string()),
            mime_type: Some("application/json".to_string()),
            size: None,
            icons: None,
            meta: None,
        }
        .no_annotation();

        ListResourcesResult {
            meta: None,
            resources: vec![listing],
            next_cursor: None,
        }
    }

    /// List the resource templates this server exposes.
    pub fn list_templates(&self) -> ListResourceTemplatesResult {
        let profile = RawResourceTemplate {
            uri_template: "users://{id}/profile".to_string(),
            name: "user-details".to_string(),
            title: Some("User Profile".to_string()),
            description: Some("JSON profile for a single user by id.".to_string()),
            mime_type: Some("application/json".to_string()),
            icons: None,
        }
        .no_annotation();

        ListResourceTemplatesResult {
            meta: None,
            resource_templates: vec![profile],
            next_cursor: None,
        }
    }

    /// Read the resource behind an already-parsed target.
    pub async fn read(
        &self,
        uri: &str,
        target: &UserResourceTarget,
    ) -> Result<ReadResourceResult, ResourceError> {
        let payload = match target {
            UserResourceTarget::Listing => {
                let users = self
                    .directory
                    .list_users()
                    .await
                    .map_err(|e| ResourceError::Internal(e.to_string()))?;
                let entries: Vec<_> = users
                    .iter()
                    .map(|u| {
                        json!({
                            "id": u.id.key().to_string(),
                            "name": u.name,
                            "email": u.email,
                        })
                    })
                    .collect();
                json!({ "users": entries, "count": entries.len() })
            }
            UserResourceTarget::Profile(id) => {
                let user = self.directory.get_user(id).await.map_err(|e| match e {
                    DirectoryError::NotFound(_) => ResourceError::NotFound(uri.to_string()),
                    other => ResourceError::Internal(other.to_string()),
                })?;
                json!({
                    "id": user.id.key().to_string(),
                    "name": user.name,
                    "email": user.email,
                })
            }
        };

        let text = serde_json::to_string_pretty(&payload)
            .map_err(|e| ResourceError::Internal(e.to_string()))?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri: uri.to_string(),
                mime_type: Some("application/json".to_string()),
                text,
                meta: None,
            }],
        })
    }
}
