//! clabflow user configuration
//!
//! Every field is optional; command-line flags override what is set here.
//!
//! ```yaml
//! eda:
//!   url: https://eda.lab:9443
//!   username: admin
//!   password: admin
//!   insecure: true
//! namespace-prefix: clab-
//! reconcile:
//!   retry: {max_attempts: 5, initial_delay_ms: 500}
//! bootstrap:
//!   workers: 8
//! ssh:
//!   connect-timeout: 5
//!   logins:
//!     - {username: admin, password: s3cret}
//! ```

pub mod error;

pub use error::*;

use clabflow_cloud::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file directly
pub const CONFIG_ENV: &str = "CLABFLOW_CONFIG";

const FILE_NAME: &str = "clabflow.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub eda: EdaSettings,
    pub namespace_prefix: Option<String>,
    pub reconcile: ReconcileSettings,
    pub bootstrap: BootstrapSection,
    pub ssh: SshSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct EdaSettings {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_secret: Option<String>,
    /// Skip TLS certificate verification
    pub insecure: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileSettings {
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapSection {
    pub retry: Option<RetryPolicy>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SshSettings {
    pub port: Option<u16>,
    /// Seconds
    pub connect_timeout: Option<u64>,
    pub identity_file: Option<PathBuf>,
    /// Tried before the node kind's factory login
    pub logins: Vec<LoginEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginEntry {
    pub username: String,
    pub password: Option<String>,
}

impl Config {
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content, path)?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bootstrap.workers == Some(0) {
            return Err(ConfigError::Invalid("bootstrap.workers must be at least 1".into()));
        }
        for retry in [&self.reconcile.retry, &self.bootstrap.retry].into_iter().flatten() {
            if retry.max_attempts == 0 {
                return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
            }
        }
        if let Some(url) = &self.eda.url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "eda.url must start with http:// or https://: '{}'",
                url
            )));
        }
        Ok(())
    }
}

/// Locate the config file.
///
/// Search order:
/// 1. `CLABFLOW_CONFIG` (direct path)
/// 2. `./clabflow.yaml`
/// 3. `./.clabflow/config.yaml`
/// 4. `~/.config/clabflow/config.yaml`
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::NotFound(path));
    }

    let current_dir = std::env::current_dir()?;
    let candidates = [
        current_dir.join(FILE_NAME),
        current_dir.join(".clabflow").join("config.yaml"),
    ];
    if let Some(path) = candidates.into_iter().find(|p| p.exists()) {
        return Ok(Some(path));
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("clabflow").join("config.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// Load `explicit` if given, else the discovered file, else defaults
pub fn load_config(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file()?,
    };
    match path {
        Some(path) => Ok((Config::load(&path)?, Some(path))),
        None => Ok((Config::default(), None)),
    }
}
