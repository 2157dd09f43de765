//! Configuration
//!
//! [`Settings`] is the user-editable JSON document, stored by default in
//! `~/.config/rvpatch/settings.json`. It is turned into a validated,
//! immutable [`Config`] once at startup. Creating folders is a separate,
//! explicit step ([`Config::ensure_directories`]).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::apk::ApkInspector;
use crate::tools::{RefreshPolicy, ToolFolders};

/// Default tools feed
pub const DEFAULT_TOOLS_ENDPOINT: &str = "https://releases.revanced.app/tools";

/// User settings for rvpatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Folder scanned recursively for APKs
    pub apk_folder: PathBuf,

    /// Where patched APKs are written
    pub output_folder: PathBuf,

    /// Root of the revanced-cli / revanced-patches / revanced-integrations folders
    pub tools_folder: PathBuf,

    /// Java runtime (None = `java` on PATH)
    pub java: Option<PathBuf>,

    /// aapt binary (None = `aapt` on PATH)
    pub aapt: Option<PathBuf>,

    pub tools_endpoint: String,

    /// Minimum hours between tool feed checks
    pub refresh_interval_hours: u32,

    /// Shared log receiving inspector stderr
    pub error_log: PathBuf,

    /// Optional file receiving a copy of the log output
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            apk_folder: PathBuf::from("apks"),
            output_folder: PathBuf::from("output"),
            tools_folder: PathBuf::from("revanced"),
            java: None,
            aapt: None,
            tools_endpoint: DEFAULT_TOOLS_ENDPOINT.to_string(),
            refresh_interval_hours: 24,
            error_log: PathBuf::from("error.txt"),
            log_file: None,
        }
    }
}

impl Settings {
    /// Get the default settings file path (~/.config/rvpatch/settings.json)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("rvpatch");

        Ok(config_dir.join("settings.json"))
    }

    /// Load settings from `path`, or defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let settings: Self =
            serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("tools endpoint must be an http(s) URL: {0}")]
    InvalidEndpoint(String),

    #[error("refresh interval must be at least one hour")]
    ZeroInterval,

    #[error("{0} must not be empty")]
    EmptyPath(&'static str),

    #[error("{name} not found at {path}")]
    ExecutableNotFound { name: &'static str, path: PathBuf },
}

/// Validated configuration, loaded once
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub apk_folder: PathBuf,
    pub output_folder: PathBuf,
    pub tools_folder: PathBuf,
    pub java: PathBuf,
    pub aapt: PathBuf,
    pub tools_endpoint: String,
    pub refresh_interval_hours: u32,
    pub error_log: PathBuf,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Validate settings and resolve executables
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        let java = resolve_executable("java", settings.java)?;
        let aapt = resolve_executable("aapt", settings.aapt)?;

        let config = Self {
            apk_folder: settings.apk_folder,
            output_folder: settings.output_folder,
            tools_folder: settings.tools_folder,
            java,
            aapt,
            tools_endpoint: settings.tools_endpoint,
            refresh_interval_hours: settings.refresh_interval_hours,
            error_log: settings.error_log,
            log_file: settings.log_file,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.tools_endpoint.trim();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(ConfigError::InvalidEndpoint(self.tools_endpoint.clone()));
        }

        if self.refresh_interval_hours == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        for (name, path) in [
            ("apk_folder", &self.apk_folder),
            ("output_folder", &self.output_folder),
            ("tools_folder", &self.tools_folder),
            ("error_log", &self.error_log),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::EmptyPath(name));
            }
        }

        Ok(())
    }

    /// Create the APK, output and tool folders
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.apk_folder, &self.output_folder, &self.tools_folder] {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }
        self.tool_folders()
            .create_all()
            .context("Failed to create tool folders")?;
        Ok(())
    }

    pub fn tool_folders(&self) -> ToolFolders {
        ToolFolders::under(&self.tools_folder)
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::every_hours(self.refresh_interval_hours)
    }

    /// Persisted tool acquisition state
    pub fn state_file(&self) -> PathBuf {
        self.tools_folder.join("state.json")
    }

    /// Raw copy of the last fetched tools feed
    pub fn feed_snapshot_file(&self) -> PathBuf {
        self.tools_folder.join("tools.json")
    }

    /// Package inspector writing to the shared error log
    pub fn inspector(&self) -> ApkInspector {
        ApkInspector::new(&self.aapt, &self.error_log).with_output_folder(&self.output_folder)
    }
}

/// Use the configured path if given (it must exist), otherwise look the
/// binary up on PATH, falling back to the bare name.
fn resolve_executable(name: &'static str, configured: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match configured {
        Some(path) if path.exists() => Ok(path),
        Some(path) => Err(ConfigError::ExecutableNotFound { name, path }),
        None => Ok(which::which(name).unwrap_or_else(|_| PathBuf::from(name))),
    }
}
