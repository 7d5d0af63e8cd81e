//! MCP tool handlers for the user directory.

pub mod create_random_user;
pub mod create_user;
pub mod registry;

pub use create_random_user::CreateRandomUserHandler;
pub use create_user::CreateUserHandler;
pub use registry::{ToolContext, ToolHandler, ToolRegistry};
