//! Minimal configuration loading for Shutterbug.
//!
//! This crate provides configuration loading with minimal dependencies,
//! so both the capture core and the CLI can import it without pulling
//! in the camera stack.
//!
//! # Usage
//!
//! ```rust,no_run
//! use shutterconf::ShutterConfig;
//!
//! let config = ShutterConfig::load().expect("Failed to load config");
//!
//! println!("Capture deadline: {:?}", config.capture.deadline());
//! println!("Photo dir: {}", config.store.photo_dir.display());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/shutterbug/config.toml` (system)
//! 2. `~/.config/shutterbug/config.toml` (user)
//! 3. `./shutterbug.toml` (local override)
//! 4. Environment variables (`SHUTTERBUG_*`)
//!
//! # Example Config
//!
//! ```toml
//! [capture]
//! deadline_secs = 5.0
//! auto_focus = true
//!
//! [sensor]
//! interval_secs = 0.2
//!
//! [camera]
//! preferred_device = "back0"
//! endpoints = ["photo"]
//!
//! [store]
//! photo_dir = "~/Pictures/shutterbug"
//! ```

pub mod loader;

pub use loader::{ConfigSources, discover_config_files_with_override, expand_path};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Capture pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// How long a single capture request may take before it resolves
    /// as timed out. Default: 5.0
    #[serde(default = "CaptureConfig::default_deadline_secs")]
    pub deadline_secs: f64,

    /// Whether to enable continuous auto focus on the bound device.
    /// Default: true
    #[serde(default = "CaptureConfig::default_auto_focus")]
    pub auto_focus: bool,
}

impl CaptureConfig {
    fn default_deadline_secs() -> f64 {
        5.0
    }

    fn default_auto_focus() -> bool {
        true
    }

    /// Capture deadline as a [`Duration`].
    pub fn deadline(&self) -> Duration {
        Duration::from_secs_f64(self.deadline_secs.max(0.0))
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            deadline_secs: Self::default_deadline_secs(),
            auto_focus: Self::default_auto_focus(),
        }
    }
}

/// Orientation sensor polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Accelerometer polling interval in seconds. Default: 0.2
    #[serde(default = "SensorConfig::default_interval_secs")]
    pub interval_secs: f64,
}

impl SensorConfig {
    fn default_interval_secs() -> f64 {
        0.2
    }

    /// Polling interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs.max(0.01))
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
        }
    }
}

/// Camera device selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Device id to bind at startup. Empty means the host default.
    #[serde(default)]
    pub preferred_device: String,

    /// Endpoints to attach when configuring a device.
    /// Known values: "photo", "preview". Default: ["photo"]
    #[serde(default = "CameraConfig::default_endpoints")]
    pub endpoints: Vec<String>,
}

impl CameraConfig {
    fn default_endpoints() -> Vec<String> {
        vec!["photo".to_string()]
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            preferred_device: String::new(),
            endpoints: Self::default_endpoints(),
        }
    }
}

/// Where saved photos land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for saved photos.
    /// Default: ~/Pictures/shutterbug
    #[serde(default = "StoreConfig::default_photo_dir")]
    pub photo_dir: PathBuf,
}

impl StoreConfig {
    fn default_photo_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join("Pictures/shutterbug"))
            .unwrap_or_else(|| PathBuf::from("Pictures/shutterbug"))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            photo_dir: Self::default_photo_dir(),
        }
    }
}

/// Complete Shutterbug configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShutterConfig {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl ShutterConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/shutterbug/config.toml`
    /// 3. `~/.config/shutterbug/config.toml`
    /// 4. `./shutterbug.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./shutterbug.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = ShutterConfig::default();

        // Load config files in order
        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        // Apply environment variable overrides
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }
}
