//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Origin used when neither the command line nor the config file names one
pub const DEFAULT_ORIGIN: &str = "http://localhost:8080";

/// Configuration for nal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Origin of the analysis server, e.g. `https://notalawyer.example`
    pub origin: Option<String>,
    /// Print the extracted corpus before connecting
    pub show_corpus: Option<bool>,
    /// Print session events as JSON lines
    pub json: Option<bool>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notalawyer")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("NAL_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            origin: Some(DEFAULT_ORIGIN.to_string()),
            show_corpus: Some(false),
            json: Some(false),
        };

        default_config.save()?;
        Ok(path)
    }

    /// Server origin, falling back to [`DEFAULT_ORIGIN`]
    pub fn origin_or_default(&self) -> &str {
        self.origin.as_deref().unwrap_or(DEFAULT_ORIGIN)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# nal configuration file
# Place at ~/.config/notalawyer/config.toml (Linux),
# ~/Library/Application Support/notalawyer/config.toml (Mac)
# or %APPDATA%\notalawyer\config.toml (Windows). NAL_CONFIG_PATH overrides the location.

# Origin of the analysis server; the chat endpoint is derived from it
# (http -> ws, https -> wss, path /api/v1/doc-analysis)
origin = "http://localhost:8080"

# Print the extracted text of all documents before connecting
show_corpus = false

# Print session events as JSON lines instead of rendered chat
json = false
"#
}
