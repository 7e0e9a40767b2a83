//! Process-wide configuration, loaded once at start-up.
//!
//! Components receive the parts they need; nothing reads the environment
//! after [`AgentConfig::from_env`] returns.

use std::path::{Path, PathBuf};
use std::time::Duration;

use vcr_tool::{ToolTimeouts, DEFAULT_BINARY};

pub const DEFAULT_LLM_ENDPOINT: &str = "http://127.0.0.1:1234/v1";

/// Errors raised while assembling configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot determine home directory: set HOME or VCR_HOME")]
    NoHome,

    #[error("cannot determine current directory: {0}")]
    CurrentDir(#[from] std::io::Error),
}

/// OpenAI-compatible endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    /// Base URL without a trailing slash.
    pub endpoint: String,
    /// Model id; `None` means ask the endpoint.
    pub model: Option<String>,
    /// Bearer token; `None` sends no auth header.
    pub api_key: Option<String>,
    pub chat_timeout: Duration,
    pub models_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            model: None,
            api_key: None,
            chat_timeout: Duration::from_secs(90),
            models_timeout: Duration::from_secs(10),
        }
    }
}

impl LlmConfig {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
    /// Working directory of the render tool; relative paths resolve here.
    pub project_root: PathBuf,
    pub vcr_home: PathBuf,
    pub context_store: PathBuf,
    /// Render tool name or explicit path.
    pub binary: String,
}

impl PathsConfig {
    pub fn rooted_at(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let vcr_home = project_root.join(".vcr");
        Self {
            context_store: vcr_home.join("brain.db"),
            vcr_home,
            project_root,
            binary: DEFAULT_BINARY.to_string(),
        }
    }

    pub fn renders_dir(&self) -> PathBuf {
        self.project_root.join("renders")
    }

    /// Resolve `path` against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

/// Everything the agent needs, read once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub llm: LlmConfig,
    pub paths: PathsConfig,
    pub tools: ToolTimeouts,
}

impl AgentConfig {
    /// Defaults rooted at `project_root`, for tests and embedding.
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        Self {
            llm: LlmConfig::default(),
            paths: PathsConfig::rooted_at(project_root),
            tools: ToolTimeouts::default(),
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir()?;
        Self::from_lookup(|key| std::env::var(key).ok(), cwd)
    }

    /// Load from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F, cwd: PathBuf) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let llm = LlmConfig {
            model: var("VCR_LLM_MODEL"),
            api_key: var("VCR_LLM_API_KEY"),
            ..LlmConfig::default()
        }
        .with_endpoint(&var("VCR_LLM_ENDPOINT").unwrap_or_else(|| DEFAULT_LLM_ENDPOINT.to_string()));

        let project_root = var("VCR_PROJECT_ROOT").map(PathBuf::from).unwrap_or(cwd);
        let vcr_home = match var("VCR_HOME") {
            Some(home) => PathBuf::from(home),
            None => var("HOME")
                .map(|h| PathBuf::from(h).join(".vcr"))
                .ok_or(ConfigError::NoHome)?,
        };
        let context_store = var("VCR_CONTEXT_STORE")
            .map(PathBuf::from)
            .unwrap_or_else(|| vcr_home.join("brain.db"));
        let binary = var("VCR_BINARY").unwrap_or_else(|| DEFAULT_BINARY.to_string());

        Ok(Self {
            llm,
            paths: PathsConfig {
                project_root,
                vcr_home,
                context_store,
                binary,
            },
            tools: ToolTimeouts::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AgentConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|k| vars.get(k).cloned(), PathBuf::from("/work"))
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("HOME", "/home/ada")]).unwrap();
        assert_eq!(config.llm.endpoint, "http://127.0.0.1:1234/v1");
        assert_eq!(config.llm.model, None);
        assert_eq!(config.llm.chat_timeout, Duration::from_secs(90));
        assert_eq!(config.paths.project_root, PathBuf::from("/work"));
        assert_eq!(config.paths.context_store, PathBuf::from("/home/ada/.vcr/brain.db"));
        assert_eq!(config.paths.binary, "vcr");
        assert_eq!(config.tools.build, Duration::from_secs(180));
    }

    #[test]
    fn test_overrides_and_trailing_slash() {
        let config = load(&[
            ("VCR_LLM_ENDPOINT", "https://api.example.com/v1/"),
            ("VCR_LLM_MODEL", "gpt-4o-mini"),
            ("VCR_LLM_API_KEY", "sk-test"),
            ("VCR_HOME", "/opt/vcr"),
            ("VCR_PROJECT_ROOT", "/src/vcr"),
            ("VCR_BINARY", "/usr/local/bin/vcr"),
        ])
        .unwrap();
        assert_eq!(config.llm.endpoint, "https://api.example.com/v1");
        assert_eq!(config.llm.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.paths.context_store, PathBuf::from("/opt/vcr/brain.db"));
        assert_eq!(config.paths.renders_dir(), PathBuf::from("/src/vcr/renders"));
        assert_eq!(config.paths.binary, "/usr/local/bin/vcr");
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = load(&[("HOME", "/h"), ("VCR_LLM_MODEL", ""), ("VCR_LLM_API_KEY", "  ")]).unwrap();
        assert_eq!(config.llm.model, None);
        assert_eq!(config.llm.api_key, None);
    }

    #[test]
    fn test_missing_home() {
        assert!(matches!(load(&[]), Err(ConfigError::NoHome)));
    }
}
