//! Configuration and the persisted enabled flag.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory under which photo albums live.
    #[serde(default = "default_pictures_dir")]
    pub pictures_dir: PathBuf,

    /// Album receiving captured photos.
    #[serde(default = "default_album")]
    pub album: String,

    /// SQLite index for the photo store.
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Upper bound on the wait for image delivery after a capture request
    /// completes, in seconds.
    #[serde(default = "default_image_wait_secs")]
    pub image_wait_secs: u64,

    /// Whether unlock/boot triggers start a capture.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_pictures_dir() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Pictures")
}

fn default_album() -> String {
    "IntruderSelfie".to_string()
}

fn default_index_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snaptrap")
        .join("index.db")
}

fn default_image_wait_secs() -> u64 {
    8
}

fn default_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pictures_dir: default_pictures_dir(),
            album: default_album(),
            index_path: default_index_path(),
            image_wait_secs: default_image_wait_secs(),
            enabled: default_enabled(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // First run: persist the defaults.
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("snaptrap")
            .join("config.toml")
    }

    pub fn image_wait(&self) -> Duration {
        Duration::from_secs(self.image_wait_secs)
    }
}

/// Shared handle to the persisted enabled flag.
///
/// Every activation decision point (trigger handling, boot-time startup,
/// the UI toggle) holds a clone of one instance, so they can never read
/// divergent values.
#[derive(Clone)]
pub struct EnabledFlag {
    value: Arc<AtomicBool>,
    config_path: PathBuf,
}

impl EnabledFlag {
    pub fn new(config: &Config, config_path: PathBuf) -> Self {
        Self {
            value: Arc::new(AtomicBool::new(config.enabled)),
            config_path,
        }
    }

    pub fn get(&self) -> bool {
        self.value.load(Ordering::SeqCst)
    }

    /// Flip the flag and persist it through the config file.
    pub fn set(&self, enabled: bool) -> Result<()> {
        self.value.store(enabled, Ordering::SeqCst);
        let mut config = Config::load_from(&self.config_path)?;
        config.enabled = enabled;
        config.save_to(&self.config_path)
    }
}
