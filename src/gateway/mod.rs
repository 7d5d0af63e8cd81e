//! Authorization gateway: authenticate, authorize, execute, log.
//!
//! Guards wrap each exposed operation kind and run the same state machine:
//! an absent auth context is an immediate unauthenticated denial (the only
//! outcome that writes no audit row, since there is no identity to attribute
//! it to); a present context is checked against the permission resolver, and
//! whatever happens next is audited before the outcome reaches the caller.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::audit::{AuditDetails, AuditRecorder};
use crate::auth::{AuthContext, can_access_resource, can_execute_tool, can_use_prompt};

/// Outcomes of a guarded invocation that did not produce a result.
#[derive(Debug)]
pub enum GuardError {
    /// No auth context was supplied; nothing ran and nothing was audited.
    Unauthenticated,
    /// The identity lacks the required capability. Audited.
    PermissionDenied {
        /// Dotted action name that was denied.
        action: String,
    },
    /// The wrapped operation itself failed. Audited, then propagated
    /// unchanged.
    Operation(anyhow::Error),
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "Authentication required"),
            Self::PermissionDenied { action } => {
                write!(f, "Permission denied: {}", action)
            }
            Self::Operation(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for GuardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Operation(e) => e.source(),
            _ => None,
        }
    }
}

/// Composes permission resolution and audit recording into reusable guards.
pub struct AuthGateway {
    recorder: Arc<AuditRecorder>,
}

impl AuthGateway {
    /// Create a new gateway over the given audit recorder.
    pub fn new(recorder: Arc<AuditRecorder>) -> Self {
        Self { recorder }
    }

    /// Guard a tool invocation. Audit action: `tool.<name>`.
    pub async fn guard_tool<T, F, Fut>(
        &self,
        ctx: Option<&AuthContext>,
        tool_name: &str,
        input: Option<Value>,
        handler: F,
    ) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let action = format!("tool.{tool_name}");
        let allowed = ctx
            .map(|c| can_execute_tool(c.permissions(), tool_name))
            .unwrap_or(false);
        self.enforce(ctx, allowed, action, None, input, handler).await
    }

    /// Guard a resource read. Audit action: `resource.<name>.read`, with the
    /// URI recorded as the touched resource.
    pub async fn guard_resource<T, F, Fut>(
        &self,
        ctx: Option<&AuthContext>,
        resource_name: &str,
        uri: &str,
        handler: F,
    ) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let action = format!("resource.{resource_name}.read");
        let allowed = ctx
            .map(|c| can_access_resource(c.permissions(), resource_name))
            .unwrap_or(false);
        self.enforce(
            ctx,
            allowed,
            action,
            Some(uri.to_string()),
            Some(serde_json::json!({ "uri": uri })),
            handler,
        )
        .await
    }

    /// Guard a prompt retrieval. Audit action: `prompt.<name>`.
    pub async fn guard_prompt<T, F, Fut>(
        &self,
        ctx: Option<&AuthContext>,
        prompt_name: &str,
        input: Option<Value>,
        handler: F,
    ) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let action = format!("prompt.{prompt_name}");
        let allowed = ctx
            .map(|c| can_use_prompt(c.permissions(), prompt_name))
            .unwrap_or(false);
        self.enforce(ctx, allowed, action, None, input, handler).await
    }

    /// The shared state machine: authenticate, authorize, execute, log.
    ///
    /// Permission check precedes execution; execution precedes its own audit
    /// write; the audit write is best-effort and never replaces the outcome.
    async fn enforce<T, F, Fut>(
        &self,
        ctx: Option<&AuthContext>,
        allowed: bool,
        action: String,
        resource: Option<String>,
        metadata: Option<Value>,
        handler: F,
    ) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        // No identity, no audit row: there is nobody to attribute it to.
        let Some(ctx) = ctx else {
            return Err(GuardError::Unauthenticated);
        };

        let details = |error_message: Option<String>, metadata: Option<Value>| AuditDetails {
            resource: resource.clone(),
            error_message,
            metadata,
            client_address: ctx.client_address().map(|s| s.to_string()),
            client_agent: ctx.client_agent().map(|s| s.to_string()),
        };

        if !allowed {
            self.recorder
                .record(
                    ctx.identity_id(),
                    &action,
                    false,
                    details(Some("Permission denied".to_string()), metadata),
                )
                .await;
            return Err(GuardError::PermissionDenied { action });
        }

        match handler().await {
            Ok(result) => {
                self.recorder
                    .record(ctx.identity_id(), &action, true, details(None, metadata))
                    .await;
                Ok(result)
            }
            Err(e) => {
                self.recorder
                    .record(
                        ctx.identity_id(),
                        &action,
                        false,
                        details(Some(e.to_string()), metadata),
                    )
                    .await;
                Err(GuardError::Operation(e))
            }
        }
    }
}
