use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Context;

use serde::{Deserialize, Serialize};

/// Timing policy as written in the settings file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySetting {
    /// Time budget measured from when each batch starts accumulating.
    #[default]
    FixedTimeout,
    /// Time budget doubles as the minimum spacing between batch starts.
    FixedFrequency,
}

/// Raw batching settings, as persisted on disk or collected from the CLI.
///
/// Values are signed so that invalid input survives deserialization and can be
/// rejected with a precise error when the engine config is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "BatchSettings::default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "BatchSettings::default_batch_timeout_ms")]
    pub batch_timeout_ms: i64,
    #[serde(default)]
    pub policy: PolicySetting,
}

impl BatchSettings {
    pub const DEFAULT_BATCH_SIZE: i64 = 5;
    pub const DEFAULT_BATCH_TIMEOUT_MS: i64 = 100;

    fn default_batch_size() -> i64 {
        Self::DEFAULT_BATCH_SIZE
    }

    fn default_batch_timeout_ms() -> i64 {
        Self::DEFAULT_BATCH_TIMEOUT_MS
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            batch_timeout_ms: Self::DEFAULT_BATCH_TIMEOUT_MS,
            policy: PolicySetting::default(),
        }
    }
}

/// Resolve the config root from `XDG_CONFIG_HOME` and `HOME`. Empty values
/// count as unset, so an exported-but-blank XDG dir falls back to `~/.config`.
fn config_root(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    let non_empty = |v: Option<OsString>| v.filter(|v| !v.is_empty()).map(PathBuf::from);
    non_empty(xdg_config_home).or_else(|| non_empty(home).map(|home| home.join(".config")))
}

pub fn settings_path() -> anyhow::Result<PathBuf> {
    let root = config_root(std::env::var_os("XDG_CONFIG_HOME"), std::env::var_os("HOME"))
        .context("neither XDG_CONFIG_HOME nor HOME is set")?;
    Ok(root.join("microbatch").join("config.json"))
}

/// Load settings from the default location, `None` when no file exists yet.
pub fn load_settings() -> anyhow::Result<Option<BatchSettings>> {
    load_settings_from(&settings_path()?)
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<Option<BatchSettings>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let settings: BatchSettings = serde_json::from_str(&raw)
        .map_err(|err| anyhow::anyhow!("parse {}: {err}", path.display()))?;
    Ok(Some(settings))
}

pub fn save_settings(settings: &BatchSettings) -> anyhow::Result<PathBuf> {
    let path = settings_path()?;
    save_settings_to(&path, settings)?;
    Ok(path)
}

pub fn save_settings_to(path: &Path, settings: &BatchSettings) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid config path: {}", path.display()))?;
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(settings)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}
