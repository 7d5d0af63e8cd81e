use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use userdir_mcp::{
    AuditRecorder, DatabaseConfig, IdentityStore, ProviderConfig, SessionToken, build_components,
    server::{McpServer, start_mcp_http},
};

// rmcp imports for MCP stdio server mode
use rmcp::service::ServiceExt;
use rmcp::transport::stdio;

#[derive(Parser)]
#[command(name = "userdir-mcp")]
#[command(about = "User directory MCP server with session auth and audit logging")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as an MCP stdio server (for use in mcp.json)
    McpStdio {
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
        /// Path to a JSON provider config (falls back to IDP_* env vars)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Session token for this stdio session
        #[arg(long, env = "USERDIR_SESSION_TOKEN")]
        session_token: Option<String>,
    },
    /// Run as an MCP HTTP server
    McpHttp {
        /// Bind address, e.g. 0.0.0.0:3971
        #[arg(long, default_value = "0.0.0.0:3971")]
        bind: String,
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
        /// Path to a JSON provider config (falls back to IDP_* env vars)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Initialize the database
    Init {
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
    /// Print recent audit records, newest first
    AuditReport {
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
        /// Maximum number of records to print
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Delete sessions whose expiry is in the past
    SweepSessions {
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("userdir_mcp=info".parse()?)
                .add_directive("rmcp=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::McpStdio {
            db_url,
            config,
            session_token,
        } => {
            info!("Starting MCP stdio server with db_url={}", db_url);

            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            let provider_config = ProviderConfig::resolve(config)?;
            let components = build_components(db_config, provider_config).await?;

            let token = session_token.map(SessionToken::new);
            if token.is_none() {
                info!("No session token supplied; all guarded calls will be rejected");
            }

            let server = McpServer::with_token(components, token);
            let service = server
                .serve(stdio())
                .await
                .inspect_err(|e| tracing::error!("serving error: {:?}", e))?;

            // Block until the MCP session ends.
            service.waiting().await?;
            info!("MCP stdio server session ended");
        }
        Commands::McpHttp {
            bind,
            db_url,
            config,
        } => {
            info!("Starting MCP HTTP server on {} with db_url={}", bind, db_url);

            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            let provider_config = ProviderConfig::resolve(config)?;
            let components = build_components(db_config, provider_config).await?;

            start_mcp_http(components, &bind).await?;
        }
        Commands::Init { db_url } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            info!("Initializing database at {}...", db_config.url);
            let db = userdir_mcp::create_connection(db_config).await?;
            userdir_mcp::ensure_schema(&db).await?;
            info!("Database initialized successfully");
        }
        Commands::AuditReport { db_url, limit } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            let db = userdir_mcp::create_connection(db_config).await?;
            userdir_mcp::ensure_schema(&db).await?;

            let recorder = AuditRecorder::new(db);
            let records = recorder.list_recent(limit).await?;

            println!("{} audit record(s):", records.len());
            println!();
            for record in records {
                let outcome = if record.success { "ok" } else { "FAILED" };
                let when = record
                    .created_at
                    .as_ref()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("  [{}] {} {} ({})", when, outcome, record.action, record.identity_id);
                if let Some(resource) = &record.resource {
                    println!("        resource: {}", resource);
                }
                if let Some(error) = &record.error_message {
                    println!("        error:    {}", error);
                }
            }
        }
        Commands::SweepSessions { db_url } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            let db = userdir_mcp::create_connection(db_config).await?;
            userdir_mcp::ensure_schema(&db).await?;

            let store = IdentityStore::new(db);
            let removed = store.sweep_expired_sessions().await?;
            println!("Removed {} expired session(s)", removed);
        }
    }

    Ok(())
}
