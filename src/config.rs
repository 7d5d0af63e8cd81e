use serde::Deserialize;
use std::{env, fs, path::PathBuf};

/// Default session lease when the provider omits an expiry, in minutes.
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 60;

/// Connection settings for the external identity provider.
///
/// The provider is an opaque collaborator: it verifies bearer assertions and
/// serves user profiles. Everything here is transport plumbing for those two
/// calls.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider API, e.g. "https://idp.example.com/v1".
    pub base_url: String,
    /// Project secret sent on every provider call.
    pub project_secret: String,
    /// Session lease applied when the provider reports no expiry, in minutes.
    #[serde(default = "default_session_ttl_minutes")]
    pub default_session_ttl_minutes: i64,
}

fn default_session_ttl_minutes() -> i64 {
    DEFAULT_SESSION_TTL_MINUTES
}

impl ProviderConfig {
    /// Load provider settings from the environment.
    ///
    /// Reads `IDP_BASE_URL`, `IDP_PROJECT_SECRET` and optionally
    /// `IDP_SESSION_TTL_MINUTES`.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = env::var("IDP_BASE_URL")
            .map_err(|_| anyhow::anyhow!("IDP_BASE_URL is not set"))?;
        let project_secret = env::var("IDP_PROJECT_SECRET")
            .map_err(|_| anyhow::anyhow!("IDP_PROJECT_SECRET is not set"))?;
        let default_session_ttl_minutes = env::var("IDP_SESSION_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SESSION_TTL_MINUTES);

        Ok(Self {
            base_url,
            project_secret,
            default_session_ttl_minutes,
        })
    }

    /// Load provider settings from a JSON file, expanding `${VAR}` references
    /// against the environment so secrets can stay out of the file itself.
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let expanded = expand_env_vars(&raw);
        let config: ProviderConfig = serde_json::from_str(&expanded)?;
        Ok(config)
    }

    /// Resolve the provider config: explicit file if given, otherwise env.
    pub fn resolve(file: Option<PathBuf>) -> anyhow::Result<Self> {
        match file {
            Some(path) => Self::from_file(&path),
            None => Self::from_env(),
        }
    }
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            while let Some(c) = chars.next() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_expand_env_vars_known_variable() {
        // Safety: test-local variable name, no concurrent reader cares
        unsafe { env::set_var("USERDIR_TEST_SECRET", "s3cret") };
        let out = expand_env_vars("token=${USERDIR_TEST_SECRET}");
        assert_eq!(out, "token=s3cret");
    }

    #[test]
    fn test_expand_env_vars_unknown_variable_kept() {
        let out = expand_env_vars("x=${USERDIR_TEST_DOES_NOT_EXIST}");
        assert_eq!(out, "x=${USERDIR_TEST_DOES_NOT_EXIST}");
    }

    #[test]
    fn test_from_file_with_expansion() {
        unsafe { env::set_var("USERDIR_TEST_FILE_SECRET", "from-env") };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"base_url": "https://idp.example.com/v1", "project_secret": "${{USERDIR_TEST_FILE_SECRET}}"}}"#
        )
        .unwrap();

        let config = ProviderConfig::from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.base_url, "https://idp.example.com/v1");
        assert_eq!(config.project_secret, "from-env");
        assert_eq!(
            config.default_session_ttl_minutes,
            DEFAULT_SESSION_TTL_MINUTES
        );
    }

    #[test]
    fn test_from_file_with_explicit_ttl() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"base_url": "https://idp.example.com/v1", "project_secret": "x", "default_session_ttl_minutes": 15}}"#
        )
        .unwrap();

        let config = ProviderConfig::from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.default_session_ttl_minutes, 15);
    }
}
