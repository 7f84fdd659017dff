use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration loaded from `~/.config/cdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdmConfig {
    /// Root for permanent downloads (each item gets `<root>/<item_id>/`).
    /// Defaults to `~/.local/share/cdm/downloads`.
    #[serde(default)]
    pub downloads_dir: Option<PathBuf>,
    /// Where the bundled backend writes in-flight bytes. Defaults to the system temp dir.
    #[serde(default)]
    pub transient_dir: Option<PathBuf>,
    /// Capacity of the state/progress broadcast channels. Slow subscribers lose the oldest events.
    pub event_buffer: usize,
    /// Minimum progress delta between two ledger writes while a transfer runs.
    pub progress_persist_step: f64,
    /// How long a transfer may sit at 100% without a completion event before it is probed.
    pub completion_grace_ms: u64,
    /// Connect timeout for the bundled backend, in seconds.
    pub connect_timeout_secs: u64,
    /// Abort a transfer slower than this many bytes/s for `low_speed_time_secs`.
    pub low_speed_limit_bytes: u32,
    pub low_speed_time_secs: u64,
    /// Extension used when a catalog item has none.
    pub default_extension: String,
}

impl Default for CdmConfig {
    fn default() -> Self {
        Self {
            downloads_dir: None,
            transient_dir: None,
            event_buffer: 256,
            progress_persist_step: 0.05,
            completion_grace_ms: 5_000,
            connect_timeout_secs: 30,
            low_speed_limit_bytes: 1024,
            low_speed_time_secs: 60,
            default_extension: "mp4".to_string(),
        }
    }
}

impl CdmConfig {
    pub fn completion_grace(&self) -> Duration {
        Duration::from_millis(self.completion_grace_ms)
    }

    /// Directory for transient transfer files.
    pub fn transient_dir(&self) -> PathBuf {
        self.transient_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("cdm-transfers"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("cdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<CdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = CdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: CdmConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
