use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of the Ollama server (ignored by other providers)
    #[serde(default)]
    pub host: Option<String>,
    /// Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_request: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// The only directory plans may touch
    #[serde(default = "default_sandbox_dir")]
    pub sandbox_dir: PathBuf,
    /// Where run records are written
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_sandbox_dir() -> PathBuf {
    PathBuf::from("./runs/sandbox")
}

fn default_runs_dir() -> PathBuf {
    PathBuf::from("./runs")
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            host: None,
            api_key: String::new(),
            max_tokens_per_request: default_max_tokens(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            sandbox_dir: default_sandbox_dir(),
            runs_dir: default_runs_dir(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${ANTHROPIC_API_KEY}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Loads the config file if it exists, otherwise falls back to defaults
    /// (local Ollama, sandbox under ./runs/sandbox).
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.llm.max_tokens_per_request, 4096);
        assert_eq!(config.workspace.sandbox_dir, PathBuf::from("./runs/sandbox"));
        assert_eq!(config.workspace.runs_dir, PathBuf::from("./runs"));
    }

    #[test]
    fn test_partial_llm_section() {
        let config: Config = toml::from_str(
            "[llm]\nprovider = \"anthropic\"\nmodel = \"claude-sonnet-4-5-20250929\"\n",
        )
        .unwrap();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.model, "claude-sonnet-4-5-20250929");
        // Unset fields keep their defaults
        assert_eq!(config.llm.max_tokens_per_request, 4096);
    }

    #[test]
    fn test_workspace_section() {
        let config: Config = toml::from_str(
            "[workspace]\nsandbox_dir = \"/srv/agent/box\"\nruns_dir = \"/srv/agent/runs\"\n",
        )
        .unwrap();
        assert_eq!(config.workspace.sandbox_dir, PathBuf::from("/srv/agent/box"));
        assert_eq!(config.workspace.runs_dir, PathBuf::from("/srv/agent/runs"));
    }

    #[test]
    fn test_load_expands_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            "[llm]\nprovider = \"anthropic\"\napi_key = \"${PLANWRIGHT_TEST_KEY}\"\n",
        )
        .unwrap();
        std::env::set_var("PLANWRIGHT_TEST_KEY", "sk-test-123");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.llm.api_key, "sk-test-123");
    }

    #[test]
    fn test_load_or_default_with_missing_file() {
        let config = Config::load_or_default("/nonexistent/agent.toml").unwrap();
        assert_eq!(config.llm.provider, "ollama");
    }

    #[test]
    fn test_host_field() {
        let config: Config =
            toml::from_str("[llm]\nhost = \"http://10.0.0.5:11434\"\n").unwrap();
        assert_eq!(config.llm.host.as_deref(), Some("http://10.0.0.5:11434"));
    }
}
