use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{host::Timeouts, model::CodeName};

/// Operator-level settings for the tool itself, as opposed to the
/// per-application [`crate::model::ProvisioningConfig`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ToolConfig {
    pub last_code_name: Option<String>,
    pub last_domain: Option<String>,
    pub command_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub verify_attempts: u32,
    pub verify_interval_ms: u64,
    pub state_dir: PathBuf,
    pub lock_dir: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            last_code_name: None,
            last_domain: None,
            command_timeout_secs: 600,
            install_timeout_secs: 1800,
            verify_attempts: 15,
            verify_interval_ms: 1000,
            state_dir: PathBuf::from("/var/lib/appforge"),
            lock_dir: PathBuf::from("/run/lock"),
        }
    }
}

impl ToolConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            install: Duration::from_secs(self.install_timeout_secs),
            verify_attempts: self.verify_attempts.max(1),
            verify_interval: Duration::from_millis(self.verify_interval_ms),
        }
    }

    pub fn journal_path(&self, code: &CodeName) -> PathBuf {
        self.state_dir.join(format!("{code}.journal.json"))
    }
}

pub fn resolve_config_path() -> Result<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .context("unable to resolve config directory (XDG_CONFIG_HOME or HOME)")?;

    Ok(base.join("appforge").join("config.json"))
}

pub fn load() -> Result<ToolConfig> {
    let path = resolve_config_path()?;
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<ToolConfig> {
    if !path.exists() {
        return Ok(ToolConfig::default());
    }

    let raw = fs::read_to_string(path).with_context(|| format!("failed to read config at {}", path.display()))?;
    let cfg = serde_json::from_str(&raw).with_context(|| format!("failed to parse config at {}", path.display()))?;
    Ok(cfg)
}

pub fn save(path: &Path, config: &ToolConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("failed to create config dir {}", parent.display()))?;
    }

    let serialized = serde_json::to_string_pretty(config).context("failed to serialize config")?;
    crate::util::atomic_write(path, serialized.as_bytes())
        .with_context(|| format!("failed to write config to {}", path.display()))?;
    Ok(())
}
