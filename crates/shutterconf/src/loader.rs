//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, ShutterConfig};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    // System config
    let system = PathBuf::from("/etc/shutterbug/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("shutterbug/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    // Local override (current directory)
    let local = PathBuf::from("shutterbug.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Partial config as it appears in a single file. Every field is
/// optional so a file only overrides what it names.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    capture: RawCapture,
    #[serde(default)]
    sensor: RawSensor,
    #[serde(default)]
    camera: RawCamera,
    #[serde(default)]
    store: RawStore,
}

#[derive(Debug, Default, Deserialize)]
struct RawCapture {
    deadline_secs: Option<f64>,
    auto_focus: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSensor {
    interval_secs: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCamera {
    preferred_device: Option<String>,
    endpoints: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStore {
    photo_dir: Option<String>,
}

/// Load a TOML file and overlay its values onto `config`.
///
/// Fields the file does not mention are left alone, so calling this
/// once per discovered file gives later-wins merging.
pub fn apply_file(config: &mut ShutterConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let raw: RawConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    apply_raw(config, raw);
    Ok(())
}

fn apply_raw(config: &mut ShutterConfig, raw: RawConfig) {
    if let Some(v) = raw.capture.deadline_secs {
        config.capture.deadline_secs = v;
    }
    if let Some(v) = raw.capture.auto_focus {
        config.capture.auto_focus = v;
    }
    if let Some(v) = raw.sensor.interval_secs {
        config.sensor.interval_secs = v;
    }
    if let Some(v) = raw.camera.preferred_device {
        config.camera.preferred_device = v;
    }
    if let Some(v) = raw.camera.endpoints {
        config.camera.endpoints = v;
    }
    if let Some(v) = raw.store.photo_dir {
        config.store.photo_dir = expand_path(&v);
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ShutterConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("SHUTTERBUG_DEADLINE_SECS") {
        if let Ok(secs) = v.parse() {
            config.capture.deadline_secs = secs;
            sources
                .env_overrides
                .push("SHUTTERBUG_DEADLINE_SECS".to_string());
        }
    }
    if let Ok(v) = env::var("SHUTTERBUG_SENSOR_INTERVAL_SECS") {
        if let Ok(secs) = v.parse() {
            config.sensor.interval_secs = secs;
            sources
                .env_overrides
                .push("SHUTTERBUG_SENSOR_INTERVAL_SECS".to_string());
        }
    }
    if let Ok(v) = env::var("SHUTTERBUG_DEVICE") {
        config.camera.preferred_device = v;
        sources.env_overrides.push("SHUTTERBUG_DEVICE".to_string());
    }
    if let Ok(v) = env::var("SHUTTERBUG_PHOTO_DIR") {
        config.store.photo_dir = expand_path(&v);
        sources.env_overrides.push("SHUTTERBUG_PHOTO_DIR".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                return PathBuf::from(var_value).join(&stripped[slash_pos + 1..]);
            }
            return PathBuf::from(path);
        }
        return env::var(stripped)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(path));
    }

    PathBuf::from(path)
}
