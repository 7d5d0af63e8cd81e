//! Handler for the `create-random-user` tool.
//!
//! Generates a plausible user profile and stores it. A duplicate-email
//! collision is retried once inside the directory before being reported.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::{CallToolResult, Content, JsonObject};
use serde_json::json;

use crate::directory::UserDirectory;
use crate::gateway::{AuthGateway, GuardError};
use crate::tools::{ToolContext, ToolHandler};

/// Handler for the `create-random-user` tool.
pub struct CreateRandomUserHandler {
    directory: Arc<UserDirectory>,
    gateway: Arc<AuthGateway>,
}

impl CreateRandomUserHandler {
    pub fn new(directory: Arc<UserDirectory>, gateway: Arc<AuthGateway>) -> Self {
        Self { directory, gateway }
    }
}

impl ToolHandler for CreateRandomUserHandler {
    fn name(&self) -> &str {
        "create-random-user"
    }

    fn title(&self) -> Option<&str> {
        Some("Create Random User")
    }

    fn description(&self) -> &str {
        "Generate a random user profile and add it to the directory. \
         Takes no arguments."
    }

    fn input_schema(&self) -> JsonObject {
        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), json!({}));
        schema.insert("required".to_string(), json!([]));
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
            let input = serde_json::Value::Object(args);

            let outcome = gateway
                .guard_tool(auth.as_ref(), "create-random-user", Some(input), move || {
                    async move {
                        directory
                            .create_random_user()
                            .await
                            .map_err(anyhow::Error::new)
                    }
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
                Err(e) => Err(anyhow::Error::new(e)),
            }
        })
    }
}
