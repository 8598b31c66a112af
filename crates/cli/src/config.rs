//! Tool configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use transport::{InterfaceMatcher, ProtocolKind, VidPidFilter};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Default log level or `EnvFilter` directives (e.g. `warn,transport=debug`)
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "warn".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Interface protocol to look for
    #[serde(default)]
    pub protocol: ProtocolKind,
    /// VID:PID patterns, e.g. "0x18d1:*" (empty = any vendor)
    #[serde(default)]
    pub filters: Vec<String>,
    /// Only use the device with this serial number
    #[serde(default)]
    pub serial: Option<String>,
    /// Skip interfaces lacking a bulk IN or bulk OUT endpoint
    #[serde(default = "UsbSettings::default_require_bulk_pair")]
    pub require_bulk_pair: bool,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            protocol: ProtocolKind::default(),
            filters: Vec::new(),
            serial: None,
            require_bulk_pair: Self::default_require_bulk_pair(),
        }
    }
}

impl UsbSettings {
    fn default_require_bulk_pair() -> bool {
        true
    }

    /// Parsed VID:PID filters
    pub fn parsed_filters(&self) -> Result<Vec<VidPidFilter>> {
        self.filters
            .iter()
            .map(|f| {
                f.parse::<VidPidFilter>()
                    .map_err(|e| anyhow!("Invalid USB filter '{}': {}", f, e))
            })
            .collect()
    }

    /// Build the interface matcher these settings describe
    pub fn matcher(&self) -> Result<InterfaceMatcher> {
        Ok(InterfaceMatcher::for_protocol(self.protocol)
            .with_filters(self.parsed_filters()?)
            .with_serial(self.serial.clone())
            .require_bulk_pair(self.require_bulk_pair))
    }
}

impl ToolConfig {
    /// Load configuration from a file, or from the default location
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => expand_path(&p),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Err(anyhow!("No configuration file found, using defaults"));
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ToolConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::debug!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("fastboot-usb").join("config.toml")
        } else {
            PathBuf::from(".config/fastboot-usb/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        common::validate_filter(&self.general.log_level)?;

        self.usb.parsed_filters()?;

        if let Some(serial) = &self.usb.serial
            && serial.trim().is_empty()
        {
            return Err(anyhow!("Serial number must not be blank"));
        }

        Ok(())
    }
}

/// Expand `~` and environment variables in a user-supplied path
fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}
