//! MCP server implementation using rmcp.
//!
//! Exposes the user directory as tools, resources, and prompts. The bearer
//! token is captured at `initialize` (HTTP transport) or supplied up front
//! (stdio), and every capability call re-validates it so permission changes
//! and session revocation apply to in-flight MCP sessions.

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::*,
    service::{NotificationContext, RequestContext, RoleServer},
};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthContext, AuthenticationError, SessionValidator};
use crate::gateway::{AuthGateway, GuardError};
use crate::prompts::{PromptCatalog, PromptError};
use crate::resources::{ResourceError, UserResources, parse_uri};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::SessionToken;

/// Type alias for HTTP request parts stored in rmcp extensions.
type HttpParts = http::request::Parts;

/// Bearer token plus client provenance, captured once per MCP session.
#[derive(Clone)]
struct SessionCredentials {
    token: SessionToken,
    client_address: Option<String>,
    client_agent: Option<String>,
}

/// Shared backends behind every MCP session.
pub struct ServerComponents {
    pub validator: Arc<SessionValidator>,
    pub gateway: Arc<AuthGateway>,
    pub tool_registry: Arc<ToolRegistry>,
    pub resources: Arc<UserResources>,
    pub prompts: Arc<PromptCatalog>,
}

/// MCP server that handles protocol requests and delegates to the directory.
#[derive(Clone)]
pub struct McpServer {
    components: Arc<ServerComponents>,
    /// Credentials for this MCP session. Set during initialize() for the
    /// HTTP transport; pre-set for stdio. Interior mutability because
    /// initialize() takes `&self`.
    credentials: Arc<RwLock<Option<SessionCredentials>>>,
}

impl McpServer {
    /// Create a server with no pre-set credentials (HTTP mode; the token is
    /// captured from headers during initialize).
    pub fn new(components: Arc<ServerComponents>) -> Self {
        Self {
            components,
            credentials: Arc::new(RwLock::new(None)),
        }
    }

    /// Create a server with a token supplied out of band (stdio mode).
    pub fn with_token(components: Arc<ServerComponents>, token: Option<SessionToken>) -> Self {
        let credentials = token.map(|token| SessionCredentials {
            token,
            client_address: None,
            client_agent: None,
        });
        Self {
            components,
            credentials: Arc::new(RwLock::new(credentials)),
        }
    }

    /// Re-validate this session's token, if any.
    ///
    /// A missing token yields `Ok(None)` (the guards turn that into an
    /// unauthenticated protocol error); a rejected token is a -32001 error
    /// carrying the provider's reason; provider or storage trouble is an
    /// internal error.
    async fn authenticate(&self) -> Result<Option<AuthContext>, McpError> {
        let Some(credentials) = self.credentials.read().await.clone() else {
            return Ok(None);
        };

        match self
            .components
            .validator
            .validate(credentials.token.as_str())
            .await
        {
            Ok(ctx) => Ok(Some(ctx.with_client_info(
                credentials.client_address.clone(),
                credentials.client_agent.clone(),
            ))),
            Err(AuthenticationError::Rejected(reason)) => {
                tracing::warn!(reason = %reason, "Session token rejected");
                Err(McpError::new(
                    ErrorCode(-32001),
                    format!("Authentication failed: {}", reason),
                    None,
                ))
            }
            Err(e) => {
                tracing::error!("Session validation failed: {}", e);
                Err(McpError::internal_error(
                    format!("Authentication failed: {}", e),
                    None,
                ))
            }
        }
    }
}

/// Map a guard failure onto the MCP error space.
///
/// Auth failures use -32001; operation failures are unwrapped so domain
/// errors keep their own codes.
fn guard_error_to_mcp(err: GuardError) -> McpError {
    match err {
        GuardError::Unauthenticated => McpError::new(
            ErrorCode(-32001),
            "Authentication required".to_string(),
            None,
        ),
        GuardError::PermissionDenied { action } => McpError::new(
            ErrorCode(-32001),
            format!("Permission denied: {}", action),
            None,
        ),
        GuardError::Operation(e) => match e.downcast::<ResourceError>() {
            Ok(ResourceError::NotFound(uri)) => McpError::new(
                ErrorCode(-32002),
                format!("Resource not found: {}", uri),
                None,
            ),
            Ok(ResourceError::InvalidUri(uri)) => {
                McpError::invalid_params(format!("Invalid URI: {}", uri), None)
            }
            Ok(ResourceError::Internal(msg)) => {
                McpError::internal_error(format!("Failed to read resource: {}", msg), None)
            }
            Err(e) => McpError::internal_error(e.to_string(), None),
        },
    }
}

impl ServerHandler for McpServer {
    fn ping(
        &self,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Ok(()))
    }

    fn initialize(
        &self,
        _request: InitializeRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<InitializeResult, McpError>> + Send + '_ {
        let credentials_storage = self.credentials.clone();
        let extensions = context.extensions.clone();

        async move {
            // Capture the bearer token and client provenance from the HTTP
            // request parts, when the transport provides them. Stdio mode
            // keeps whatever was pre-set.
            if let Some(parts) = extensions.get::<HttpParts>() {
                let token = parts
                    .headers
                    .get(http::header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.strip_prefix("Bearer "))
                    .map(|s| SessionToken::new(s.trim()));
                let client_address = parts
                    .headers
                    .get("X-Forwarded-For")
                    .or_else(|| parts.headers.get("X-Real-IP"))
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());
                let client_agent = parts
                    .headers
                    .get(http::header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());

                if let Some(token) = token {
                    *credentials_storage.write().await = Some(SessionCredentials {
                        token,
                        client_address,
                        client_agent,
                    });
                }
            }

            Ok(InitializeResult {
                protocol_version: ProtocolVersion::V_2025_06_18,
                capabilities: ServerCapabilities::builder()
                    .enable_tools()
                    .enable_prompts()
                    .enable_resources()
                    .build(),
                server_info: Implementation::from_build_env(),
                instructions: Some(
                    "User directory manager. Create users (by hand or at random), \
                     browse them via users:// resources, and use the \
                     generate-fake-user prompt for test data. All operations \
                     require a valid session token with matching permissions."
                        .to_string(),
                ),
            })
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let result = ListToolsResult {
            tools: self.components.tool_registry.list_tools(),
            next_cursor: None,
            ..Default::default()
        };
        std::future::ready(Ok(result))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let tool_name = request.name.to_string();
        let args = request.arguments.unwrap_or_default();
        let server = self.clone();

        async move {
            let auth = server.authenticate().await?;
            let ctx = ToolContext::new(auth);

            match server
                .components
                .tool_registry
                .call_tool(&tool_name, args, &ctx)
                .await
            {
                Ok(result) => Ok(result),
                Err(e) => match e.downcast::<GuardError>() {
                    Ok(guard_err) => Err(guard_error_to_mcp(guard_err)),
                    Err(e) => Err(McpError::internal_error(
                        format!("Tool execution failed: {}", e),
                        None,
                    )),
                },
            }
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        std::future::ready(Ok(self.components.resources.list_resources()))
    }

    fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListResourceTemplatesResult, McpError>> + Send + '_ {
        std::future::ready(Ok(self.components.resources.list_templates()))
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        let uri = request.uri.to_string();
        let server = self.clone();

        async move {
            // A malformed URI names no resource, so there is nothing to
            // authorize (or audit) against.
            let target = match parse_uri(&uri) {
                Ok(target) => target,
                Err(e) => return Err(McpError::invalid_params(e.to_string(), None)),
            };

            let auth = server.authenticate().await?;
            let resources = server.components.resources.clone();
            let target_ref = &target;
            let uri_ref = uri.as_str();

            server
                .components
                .gateway
                .guard_resource(
                    auth.as_ref(),
                    target.permission_name(),
                    &uri,
                    move || async move {
                        resources
                            .read(uri_ref, target_ref)
                            .await
                            .map_err(anyhow::Error::new)
                    },
                )
                .await
                .map_err(guard_error_to_mcp)
        }
    }

    fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListPromptsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(self.components.prompts.list_prompts()))
    }

    fn get_prompt(
        &self,
        request: GetPromptRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<GetPromptResult, McpError>> + Send + '_ {
        let name = request.name.to_string();
        let arguments = request.arguments;
        let server = self.clone();

        async move {
            let auth = server.authenticate().await?;
            let prompts = server.components.prompts.clone();
            let name_ref = name.as_str();
            let args_ref = arguments.as_ref();
            let metadata = arguments
                .as_ref()
                .map(|a| serde_json::Value::Object(a.clone()));

            let outcome = server
                .components
                .gateway
                .guard_prompt(auth.as_ref(), &name, metadata, move || async move {
                    prompts
                        .get_prompt(name_ref, args_ref)
                        .map_err(anyhow::Error::new)
                })
                .await;

            match outcome {
                Ok(result) => Ok(result),
                Err(GuardError::Operation(e)) => match e.downcast::<PromptError>() {
                    Ok(PromptError::NotFound(name)) => Err(McpError::invalid_params(
                        format!("Prompt not found: {}", name),
                        None,
                    )),
                    Ok(PromptError::InvalidArguments(msg)) => Err(McpError::invalid_params(
                        format!("Invalid arguments: {}", msg),
                        None,
                    )),
                    Err(e) => Err(McpError::internal_error(
                        format!("Failed to get prompt: {}", e),
                        None,
                    )),
                },
                Err(e) => Err(guard_error_to_mcp(e)),
            }
        }
    }

    fn complete(
        &self,
        _request: CompleteRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CompleteResult, McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<CompleteRequestMethod>()))
    }

    fn set_level(
        &self,
        _request: SetLevelRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<SetLevelRequestMethod>()))
    }

    fn on_cancelled(
        &self,
        _notification: CancelledNotificationParam,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn on_progress(
        &self,
        _notification: ProgressNotificationParam,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn on_initialized(
        &self,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn on_roots_list_changed(
        &self,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_prompts()
                .enable_resources()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "User directory manager exposing user CRUD tools, users:// \
                 resources, and a fake-user generation prompt."
                    .to_string(),
            ),
        }
    }
}

/// Start the directory as an MCP Streamable HTTP server.
///
/// This exposes the MCP endpoint at `/mcp` on the given bind address,
/// e.g. `127.0.0.1:3971` or `0.0.0.0:3971`. Each HTTP session gets its own
/// `McpServer` so captured credentials never cross sessions.
pub async fn start_mcp_http(components: Arc<ServerComponents>, bind: &str) -> Result<()> {
    let service = StreamableHttpService::new(
        {
            let components = components.clone();
            move || Ok(McpServer::new(components.clone()))
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = Router::new()
        .nest_service("/mcp", service)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(bind).await?;

    tracing::info!("MCP HTTP server listening on http://{}/mcp", bind);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditRecorder;
    use crate::auth::{IdentityStore, MockIdentityProvider};
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};
    use crate::directory::UserDirectory;

    async fn setup_components(provider: Arc<MockIdentityProvider>) -> Arc<ServerComponents> {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();

        let validator = Arc::new(SessionValidator::new(
            provider,
            IdentityStore::new(db.clone()),
            chrono::Duration::minutes(60),
        ));
        let gateway = Arc::new(AuthGateway::new(Arc::new(AuditRecorder::new(db.clone()))));
        let directory = UserDirectory::new(db);

        Arc::new(ServerComponents {
            validator,
            gateway,
            tool_registry: Arc::new(ToolRegistry::new()),
            resources: Arc::new(UserResources::new(directory)),
            prompts: Arc::new(PromptCatalog::new()),
        })
    }

    #[tokio::test]
    async fn test_authenticate_without_token_is_anonymous() {
        let provider = Arc::new(MockIdentityProvider::new());
        let components = setup_components(provider).await;

        let server = McpServer::with_token(components, None);
        assert!(server.authenticate().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_authenticate_with_rejected_token_carries_reason() {
        let provider = Arc::new(MockIdentityProvider::new());
        let components = setup_components(provider).await;

        let server =
            McpServer::with_token(components, Some(SessionToken::new("revoked-token")));
        let err = server.authenticate().await.unwrap_err();

        assert_eq!(err.code, ErrorCode(-32001));
        assert!(err.message.starts_with("Authentication failed:"));
        assert!(err.message.contains("session not found"));
    }

    #[tokio::test]
    async fn test_authenticate_with_live_token_builds_context() {
        let provider = MockIdentityProvider::new();
        provider.register_session("tok", "u1", "s1", None);
        provider.register_profile("u1", "u1@example.com", Some("Test"));
        let components = setup_components(Arc::new(provider)).await;

        let server = McpServer::with_token(components, Some(SessionToken::new("tok")));
        let ctx = server.authenticate().await.unwrap().unwrap();
        assert!(!ctx.permissions().is_empty());
    }
}
