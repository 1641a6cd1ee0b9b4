use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::capture::CaptureSourceKind;
use crate::error::ConfigError;

const APP_DIR: &str = "artifact-kiosk";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Analysis and generation backend, e.g. `http://localhost:8000/api`
    pub api_url: String,
    /// Remote streaming camera (capture, status, stream)
    pub camera_url: String,
    /// Frame file kept current by the local camera daemon
    pub local_frame_path: PathBuf,
    /// Overrides the default database location
    pub db_path: Option<PathBuf>,
    pub request_timeout_secs: u64,
    /// Skip the capability check and always start with this source
    pub preferred_source: Option<CaptureSourceKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/api".to_string(),
            camera_url: "http://localhost:8080".to_string(),
            local_frame_path: std::env::temp_dir().join(APP_DIR).join("frame.jpg"),
            db_path: None,
            request_timeout_secs: 120,
            preferred_source: None,
        }
    }
}

impl Config {
    /// Load from the user config directory, then apply environment overrides
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Read a config file, falling back to defaults when missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  Ignoring malformed config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("⚠️  Could not read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// `ARKEO_API_URL`, `ARKEO_PI_URL` and `ARKEO_DB_PATH` win over the file
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let set = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = set("ARKEO_API_URL") {
            self.api_url = url;
        }
        if let Some(url) = set("ARKEO_PI_URL") {
            self.camera_url = url;
        }
        if let Some(path) = set("ARKEO_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
