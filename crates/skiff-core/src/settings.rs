//! Application settings.
//!
//! Settings are loaded from multiple sources with the following priority:
//!
//! 1. Environment variables (SKIFF_*)
//! 2. User settings file (~/.config/skiff/config.toml)
//! 3. System settings file (/etc/skiff/config.toml)
//! 4. Default values
//!
//! ## Example Settings File
//!
//! ```toml
//! data_dir = "~/.skiff"
//!
//! [vm]
//! cpus = 4
//! memory_mb = 4096
//! disk_gb = 64
//!
//! [graphics]
//! width = 1920
//! height = 1080
//!
//! [lifecycle]
//! start_timeout_secs = 90
//!
//! [logging]
//! level = "debug"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use skiff_hypervisor::{DEFAULT_DISPLAY_HEIGHT, DEFAULT_DISPLAY_WIDTH};

use crate::lifecycle::LifecycleOptions;
use crate::vm_config::VmConfig;

/// Skiff application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Data directory holding VM bundles.
    pub data_dir: PathBuf,
    /// Defaults applied to newly created VMs.
    pub vm: VmDefaults,
    /// Guest display settings.
    pub graphics: GraphicsSettings,
    /// Lifecycle tunables.
    pub lifecycle: LifecycleSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            vm: VmDefaults::default(),
            graphics: GraphicsSettings::default(),
            lifecycle: LifecycleSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Loads settings from files and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value does not
    /// fit its field.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(system_settings_path()))
            .merge(Toml::file(user_settings_path()))
            .merge(Env::prefixed("SKIFF_").split("_"))
            .extract()
    }

    /// Loads settings from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SKIFF_").split("_"))
            .extract()
    }

    /// Directory holding one bundle per VM.
    #[must_use]
    pub fn vms_dir(&self) -> PathBuf {
        self.data_dir.join("vms")
    }

    /// Lifecycle options derived from these settings.
    #[must_use]
    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            start_timeout: Duration::from_secs(self.lifecycle.start_timeout_secs),
            graphics_width: self.graphics.width,
            graphics_height: self.graphics.height,
        }
    }

    /// A new VM configuration with these defaults applied.
    #[must_use]
    pub fn new_vm_config(&self, name: &str, disk_image_path: impl Into<PathBuf>) -> VmConfig {
        VmConfig::new(
            name,
            self.vm.cpus,
            self.vm.memory_mb * 1024 * 1024,
            disk_image_path,
        )
    }

    /// Default primary disk size in bytes for created VMs.
    #[must_use]
    pub fn default_disk_size(&self) -> u64 {
        self.vm.disk_gb * 1024 * 1024 * 1024
    }
}

/// Defaults applied to newly created VMs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmDefaults {
    /// Default number of virtual CPUs.
    pub cpus: u32,
    /// Default memory in MB.
    pub memory_mb: u64,
    /// Default primary disk size in GB.
    pub disk_gb: u64,
}

impl Default for VmDefaults {
    fn default() -> Self {
        Self {
            cpus: 2,
            memory_mb: 2048,
            disk_gb: 50,
        }
    }
}

/// Guest display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsSettings {
    /// Display width in pixels.
    pub width: u32,
    /// Display height in pixels.
    pub height: u32,
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_DISPLAY_WIDTH,
            height: DEFAULT_DISPLAY_HEIGHT,
        }
    }
}

/// Lifecycle tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// How long a start may take before the attempt is abandoned.
    pub start_timeout_secs: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            start_timeout_secs: 60,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log to file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join(".skiff")
}

fn user_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("skiff")
        .join("config.toml")
}

fn system_settings_path() -> PathBuf {
    PathBuf::from("/etc/skiff/config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.vm.cpus, 2);
        assert_eq!(settings.vm.memory_mb, 2048);
        assert_eq!(settings.vm.disk_gb, 50);
        assert_eq!(settings.graphics.width, DEFAULT_DISPLAY_WIDTH);
        assert_eq!(settings.lifecycle.start_timeout_secs, 60);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_settings_paths() {
        let settings = Settings::default();
        assert!(settings.vms_dir().ends_with("vms"));
    }

    #[test]
    fn test_lifecycle_options_mapping() {
        let mut settings = Settings::default();
        settings.lifecycle.start_timeout_secs = 90;
        settings.graphics.width = 1920;
        settings.graphics.height = 1080;

        let options = settings.lifecycle_options();
        assert_eq!(options.start_timeout, Duration::from_secs(90));
        assert_eq!(options.graphics_width, 1920);
        assert_eq!(options.graphics_height, 1080);
    }

    #[test]
    fn test_new_vm_config_applies_defaults() {
        let settings = Settings::default();
        let config = settings.new_vm_config("dev-box", "/images/dev.img");
        assert_eq!(config.name, "dev-box");
        assert_eq!(config.cpu_count, 2);
        assert_eq!(config.memory_size, 2048 * 1024 * 1024);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/srv/skiff"

[vm]
cpus = 6

[lifecycle]
start_timeout_secs = 120
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/srv/skiff"));
        assert_eq!(settings.vm.cpus, 6);
        // Values absent from the file keep their defaults.
        assert_eq!(settings.vm.memory_mb, 2048);
        assert_eq!(settings.lifecycle.start_timeout_secs, 120);
    }
}
