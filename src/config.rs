use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where backups are created. One timestamped directory per run.
    pub backups_path: PathBuf,
    /// Directory holding the task definition files.
    pub tasks_path: PathBuf,
    /// Values injected into the env of every task.
    pub env: BTreeMap<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backups_path: PathBuf::from("./backups"),
            tasks_path: PathBuf::from("./tasks"),
            env: BTreeMap::new(),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config.backups_path = expand(&config.backups_path);
    config.tasks_path = expand(&config.tasks_path);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./backhaul.toml",
        "./config.toml",
        "~/.config/backhaul/config.toml",
        "/etc/backhaul/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.backups_path.as_os_str().is_empty() {
        anyhow::bail!("backups_path cannot be empty");
    }
    if !config.tasks_path.is_dir() {
        tracing::warn!("Tasks path does not exist: {:?}", config.tasks_path);
    }
    Ok(())
}
