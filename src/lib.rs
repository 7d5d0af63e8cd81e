// Core modules
mod config;
mod db;
mod types;

// Authorization and audit
mod audit;
mod auth;
mod gateway;

// Directory and MCP surface
mod directory;
mod prompts;
mod resources;
pub mod server;
mod tools;

// Re-export key types and functions
pub use audit::AuditRecorder;
pub use auth::{AuthContext, HttpIdentityProvider, IdentityStore, SessionValidator};
pub use config::ProviderConfig;
pub use db::schema::{AppUserRecord, AuditLogRecord, IdentityRecord};
pub use db::{DatabaseConfig, create_connection, ensure_schema};
pub use directory::UserDirectory;
pub use gateway::AuthGateway;
pub use server::{McpServer, ServerComponents};
pub use tools::{ToolHandler, ToolRegistry};
pub use types::SessionToken;

use std::sync::Arc;

use anyhow::Result;

use prompts::PromptCatalog;
use resources::UserResources;
use tools::{CreateRandomUserHandler, CreateUserHandler};

/// Wire up every backend behind the MCP server: storage, identity provider,
/// validator, gateway, directory, and the tool/resource/prompt surfaces.
pub async fn build_components(
    db_config: DatabaseConfig,
    provider_config: ProviderConfig,
) -> Result<Arc<ServerComponents>> {
    let db = create_connection(db_config).await?;
    ensure_schema(&db).await?;

    let provider = Arc::new(HttpIdentityProvider::new(&provider_config));
    let store = IdentityStore::new(db.clone());
    let validator = Arc::new(SessionValidator::new(
        provider,
        store,
        chrono::Duration::minutes(provider_config.default_session_ttl_minutes),
    ));

    let recorder = Arc::new(AuditRecorder::new(db.clone()));
    let gateway = Arc::new(AuthGateway::new(recorder));

    let directory = Arc::new(UserDirectory::new(db.clone()));
    let resources = Arc::new(UserResources::new(UserDirectory::new(db)));
    let prompts = Arc::new(PromptCatalog::new());

    let tool_registry = Arc::new(
        ToolRegistry::new()
            .register_handler(CreateUserHandler::new(directory.clone(), gateway.clone()))
            .register_handler(CreateRandomUserHandler::new(directory, gateway.clone())),
    );

    Ok(Arc::new(ServerComponents {
        validator,
        gateway,
        tool_registry,
        resources,
        prompts,
    }))
}
