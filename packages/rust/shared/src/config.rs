//! Application configuration for Storyboard.
//!
//! User config lives at `~/.storyboard/storyboard.toml`.
//! CLI flags override config file values, which override defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoryboardError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "storyboard.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".storyboard";

/// Default key-value database file name inside the config directory.
const DB_FILE_NAME: &str = "storyboard.db";

/// Public OpenAI endpoint.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// ---------------------------------------------------------------------------
// Config structs (matching storyboard.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation service settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Scene persistence settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Screenplay export settings.
    #[serde(default)]
    pub export: ExportConfig,
}

/// Supported generation models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenAiModel {
    #[default]
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "gpt-4")]
    Gpt4,
}

impl OpenAiModel {
    /// Model identifier as sent to the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt35Turbo => "gpt-3.5-turbo",
            Self::Gpt4 => "gpt-4",
        }
    }
}

impl fmt::Display for OpenAiModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpenAiModel {
    type Err = StoryboardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gpt-3.5-turbo" => Ok(Self::Gpt35Turbo),
            "gpt-4" => Ok(Self::Gpt4),
            other => Err(StoryboardError::config(format!(
                "unknown model '{other}': expected 'gpt-3.5-turbo' or 'gpt-4'"
            ))),
        }
    }
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself here).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default model for scene generation.
    #[serde(default)]
    pub model: OpenAiModel,

    /// API base URL; requests go to `{base_url}/chat/completions`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: OpenAiModel::default(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_temperature() -> f64 {
    0.7
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the key-value database. Defaults to `~/.storyboard/storyboard.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the database path, falling back to the config directory.
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join(DB_FILE_NAME)),
        }
    }
}

/// `[export]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory screenplay exports are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.storyboard/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StoryboardError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.storyboard/storyboard.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StoryboardError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        StoryboardError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| StoryboardError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StoryboardError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| StoryboardError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Pick the API key: the configured env var wins, then the stored credential.
pub fn resolve_api_key(config: &AppConfig, stored: Option<String>) -> Result<String> {
    let var_name = &config.openai.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => match stored {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(StoryboardError::config(format!(
                "OpenAI API key not found. Set the {var_name} environment variable \
                 or run `storyboard key set <KEY>`."
            ))),
        },
    }
}
