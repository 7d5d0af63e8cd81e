//! MCP prompts for the user directory.
//!
//! One prompt is exposed: `generate-fake-user`, which instructs the model to
//! invent a plausible user profile and hand it to the `create-user` tool.

use rmcp::model::{
    GetPromptResult, JsonObject, ListPromptsResult, Prompt as McpPrompt,
    PromptArgument as McpPromptArgument, PromptMessage, PromptMessageRole,
};

/// Name of the fake-user generation prompt.
pub const GENERATE_FAKE_USER: &str = "generate-fake-user";

/// Error types for prompt operations.
#[derive(Debug, Clone)]
pub enum PromptError {
    /// Prompt name not found.
    NotFound(String),
    /// Invalid arguments (missing required or contains unsafe data).
    InvalidArguments(String),
}

impl std::fmt::Display for PromptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromptError::NotFound(name) => write!(f, "Prompt not found: {}", name),
            PromptError::InvalidArguments(msg) => write!(f, "Invalid arguments: {}", msg),
        }
    }
}

impl std::error::Error for PromptError {}

/// Serves the static prompt catalog.
pub struct PromptCatalog;

impl PromptCatalog {
    pub fn new() -> Self {
        Self
    }

    /// List the prompts this server exposes.
    pub fn list_prompts(&self) -> ListPromptsResult {
        let prompt = McpPrompt {
            name: GENERATE_FAKE_USER.into(),
            title: Some("Generate Fake User".into()),
            description: Some(
                "Instructions for generating a realistic fake user profile \
                 suitable for the create-user tool."
                    .into(),
            ),
            arguments: Some(vec![McpPromptArgument {
                name: "locale".into(),
                title: None,
                description: Some("Optional locale hint for the generated name.".into()),
                required: Some(false),
            }]),
            icons: None,
            meta: None,
        };

        ListPromptsResult {
            meta: None,
            prompts: vec![prompt],
            next_cursor: None,
        }
    }

    /// Render a prompt by name.
    pub fn get_prompt(
        &self,
        name: &str,
        arguments: Option<&JsonObject>,
    ) -> Result<GetPromptResult, PromptError> {
        if name != GENERATE_FAKE_USER {
            return Err(PromptError::NotFound(name.to_string()));
        }

        let locale = arguments
            .and_then(|args| args.get("locale"))
            .map(|v| match v.as_str() {
                Some(s) => Ok(s.to_string()),
                None => Err(PromptError::InvalidArguments(
                    "locale must be a string".to_string(),
                )),
            })
            .transpose()?;

        let mut text = String::from(
            "Generate a realistic but entirely fictional user profile with a \
             full name and a unique, plausible email address. Do not reuse \
             names of real people. Then call the create-user tool with the \
             generated name and email.",
        );
        if let Some(locale) = locale {
            text.push_str(&format!(
                " Use names and email conventions typical for the '{}' locale.",
                locale
            ));
        }

        Ok(GetPromptResult {
            description: Some("Generate a fake user and store it in the directory.".to_string()),
            messages: vec![PromptMessage::new_text(PromptMessageRole::User, text)],
        })
    }
}

impl Default for PromptCatalog {
    fn default() -> Self {
        Self::new()
    }
}
