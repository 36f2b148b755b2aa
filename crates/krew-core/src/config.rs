use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::environment::parse_envs;
use crate::error::{KrewError, Result};
use crate::platform::Host;

const CONFIG_FILE: &str = "config.toml";

/// Default config template with rich comments
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# krew configuration file
# Location: <krew base>/config.toml

[download]
# Seconds before a download is abandoned; 0 waits forever
# Default: 0
timeout_secs = 0

# User-Agent sent with HTTP requests
# user_agent = "krew/0.2.0"

[platform]
# Pretend to run on another platform when selecting artifacts.
# KREW_OS / KREW_ARCH take precedence over these.
# Example: os = "linux", arch = "arm64"
# os = "linux"
# arch = "amd64"
"#;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub platform: PlatformConfig,
}

/// Download-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Request timeout in seconds (0 = none)
    #[serde(default)]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    format!("krew/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            user_agent: default_user_agent(),
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Host platform overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

impl Config {
    /// Load config from base directory
    pub fn load(base_dir: &Path) -> Result<Self> {
        let path = base_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| KrewError::fs("read", &path, e))?;
        let config: Config = toml::from_str(&content).map_err(|e| KrewError::ConfigParse {
            path: path.clone(),
            message: e.to_string(),
        })?;

        Ok(config)
    }

    /// Save config to base directory
    pub fn save(&self, base_dir: &Path) -> Result<()> {
        let path = base_dir.join(CONFIG_FILE);
        fs::create_dir_all(base_dir).map_err(|e| KrewError::fs("create directory", base_dir, e))?;

        let content = toml::to_string_pretty(self).map_err(|e| KrewError::ConfigParse {
            path: path.clone(),
            message: e.to_string(),
        })?;

        fs::write(&path, content).map_err(|e| KrewError::fs("write", &path, e))?;
        Ok(())
    }

    /// Get config file path
    pub fn path(base_dir: &Path) -> PathBuf {
        base_dir.join(CONFIG_FILE)
    }

    /// Initialize config with default template (rich comments)
    pub fn init(base_dir: &Path) -> Result<PathBuf> {
        let path = base_dir.join(CONFIG_FILE);
        fs::create_dir_all(base_dir).map_err(|e| KrewError::fs("create directory", base_dir, e))?;

        if !path.exists() {
            fs::write(&path, DEFAULT_CONFIG_TEMPLATE).map_err(|e| KrewError::fs("write", &path, e))?;
        }

        Ok(path)
    }

    /// Get a config value by dot-notation key
    pub fn get(&self, key: &str) -> Option<String> {
        self.list().into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Set a config value by dot-notation key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "download.timeout_secs" => {
                self.download.timeout_secs = value.parse().map_err(|_| KrewError::ConfigParse {
                    path: PathBuf::from(CONFIG_FILE),
                    message: format!("'{}' is not a number of seconds", value),
                })?;
            }
            "download.user_agent" => self.download.user_agent = value.to_string(),
            "platform.os" => self.platform.os = non_empty(value),
            "platform.arch" => self.platform.arch = non_empty(value),
            _ => {
                return Err(KrewError::ConfigKeyNotFound {
                    key: key.to_string(),
                })
            }
        }
        Ok(())
    }

    /// List all config keys with their current values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            (
                "download.timeout_secs".to_string(),
                self.download.timeout_secs.to_string(),
            ),
            (
                "download.user_agent".to_string(),
                self.download.user_agent.clone(),
            ),
            (
                "platform.os".to_string(),
                self.platform.os.clone().unwrap_or_default(),
            ),
            (
                "platform.arch".to_string(),
                self.platform.arch.clone().unwrap_or_default(),
            ),
        ]
    }

    /// Host to select artifacts for: environment overrides, then config, then detection
    pub fn host<S: AsRef<str>>(&self, environ: &[S]) -> Host {
        let mut host = Host::current();
        if let Some(os) = &self.platform.os {
            host.os = os.clone();
        }
        if let Some(arch) = &self.platform.arch {
            host.arch = arch.clone();
        }
        host.with_overrides(&parse_envs(environ))
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
