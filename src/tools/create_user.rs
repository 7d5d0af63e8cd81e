//! Handler for the `create-user` tool.
//!
//! Adds a user to the directory with a caller-supplied name and email. The
//! call is guarded: the caller needs the `tools.create-user` grant, and the
//! outcome is audited either way.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::{CallToolResult, Content, JsonObject};
use serde_json::json;

use crate::directory::UserDirectory;
use crate::gateway::{AuthGateway, GuardError};
use crate::tools::{ToolContext, ToolHandler};

/// Handler for the `create-user` tool.
pub struct CreateUserHandler {
    directory: Arc<UserDirectory>,
    gateway: Arc<AuthGateway>,
}

impl CreateUserHandler {
    pub fn new(directory: Arc<UserDirectory>, gateway: Arc<AuthGateway>) -> Self {
        Self { directory, gateway }
    }
}

impl ToolHandler for CreateUserHandler {
    fn name(&self) -> &str {
        "create-user"
    }

    fn title(&self) -> Option<&str> {
        Some("Create User")
    }

    fn description(&self) -> &str {
        "Create a new user in the directory with the given name and email. \
         Fails if the email address is already taken."
    }

    fn input_schema(&self) -> JsonObject {
        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));

        let mut properties = serde_json::Map::new();
        properties.insert(
            "name".to_string(),
            json!({
                "type": "string",
                "description": "Full name of the user."
            }),
        );
        properties.insert(
            "email".to_string(),
            json!({
                "type": "string",
                "description": "Email address. Must be unique across the directory."
            }),
        );

        schema.insert("properties".to_string(), json!(properties));
        schema.insert("required".to_string(), json!(["name", "email"]));
        schema
    }

    fn execute(
        &self,
        args: JsonObject,
        ctx: &ToolContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallToolResult>> + Send + '_>> {
        let directory = self.directory.clone();
        let gateway = self.gateway.clone();
        let auth = ctx.auth.clone();

        Box::pin(async move {
            let input = serde_json::Value::Object(args.clone());

            let outcome = gateway
                .guard_tool(auth.as_ref(), "create-user", Some(input), move || async move {
                    let name = args
                        .get("name")
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.trim().is_empty())
                        .ok_or_else(|| anyhow::anyhow!("Missing required argument: name"))?;
                    let email = args
                        .get("email")
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.trim().is_empty())
                        .ok_or_else(|| anyhow::anyhow!("Missing required argument: email"))?;

                    directory
                        .create_user(name, email)
                        .await
                        .map_err(anyhow::Error::new)
                })
                .await;

            match outcome {
                Ok(user) => {
                    let payload = json!({
                        "status": "ok",
                        "user": {
                            "id": user.id.key().to_string(),
                            "name": user.name,
                            "email": user.email,
                        }
                    });
                    let text = serde_json::to_string(&payload)
                        .unwrap_or_else(|_| "internal serialization error".to_string());
                    Ok(CallToolResult {
                        content: vec![Content::text(text)],
                        structured_content: None,
                        is_error: Some(false),
                        meta: None,
                    })
                }
                Err(GuardError::Operation(e)) => {
                    let payload = json!({
                        "status": "error",
                        "reason": e.to_string(),
                    });
                    let text = serde_json::to_string(&payload)
                        .unwrap_or_else(|_| "internal serialization error".to_string());
                    Ok(CallToolResult {
                        content: vec![Content::text(text)],
                        structured_content: None,
                        is_error: Some(true),
                        meta: None,
                    })
                }
                // Auth failures become protocol errors, not tool payloads
                Err(e) => Err(anyhow::Error::new(e)),
            }
        })
    }
}
