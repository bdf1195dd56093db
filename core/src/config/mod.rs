use crate::agent::{DEFAULT_MAX_TOOL_TURNS, RefineConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const TANDEM_DIR: &str = ".tandem";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub system_prompt: Option<String>,
    pub max_tool_turns: usize,
    pub refine: RefineConfig,
    pub stream: StreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: None,
            api_key: String::new(),
            base_url: None,
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            system_prompt: None,
            max_tool_turns: DEFAULT_MAX_TOOL_TURNS,
            refine: RefineConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_default() -> Result<Self> {
        if config_exists() {
            load_config()
        } else {
            Ok(Config::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tool_turns == 0 {
            anyhow::bail!("max_tool_turns must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!("temperature must be within [0, 2], got {}", self.temperature);
        }
        self.refine.validate()?;
        Ok(())
    }
}

pub fn get_tandem_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(TANDEM_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_tandem_dir().join("config.toml")
}

pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_path())
}

pub fn load_config_from(config_path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(config_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::anyhow!("Config file not found. Run 'tandem init' to create one.")
        } else {
            anyhow::anyhow!("Failed to read config from {}: {}", config_path.display(), e)
        }
    })?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", config_path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config in {}", config_path.display()))?;

    Ok(config)
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(config, &get_config_path())
}

pub fn save_config_to(config: &Config, config_path: &Path) -> Result<()> {
    if let Some(dir) = config_path.parent()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory at {}", dir.display()))?;
    }

    let content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config to TOML")?;

    std::fs::write(config_path, content)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    Ok(())
}

pub fn config_exists() -> bool {
    get_config_path().exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
provider = "ollama"
model = "llama3.2"

[refine]
threshold = 0.9
criteria = ["accurate", "concise"]
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();

        assert_eq!(config.provider.as_deref(), Some("ollama"));
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.max_tool_turns, 20);
        assert_eq!(config.refine.max_iterations, 3);
        assert_eq!(config.refine.threshold, 0.9);
        assert_eq!(config.refine.criteria, vec!["accurate", "concise"]);
        assert!(config.stream.enabled);
    }

    #[test]
    fn save_then_load_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");
        let config = Config {
            system_prompt: Some("You are terse.".into()),
            max_tool_turns: 5,
            ..Config::default()
        };

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.system_prompt.as_deref(), Some("You are terse."));
        assert_eq!(loaded.max_tool_turns, 5);
    }

    #[test]
    fn missing_file_points_at_init() {
        let tmp = TempDir::new().unwrap();
        let err = load_config_from(&tmp.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("tandem init"));
    }

    #[test]
    fn invalid_refine_table_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[refine]\nmax_iterations = 0\n").unwrap();

        assert!(load_config_from(&path).is_err());
    }
}
