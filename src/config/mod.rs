use crate::models::{BuildSettings, Environment};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use thiserror::Error;

/// Default settings file name, looked up in the working directory.
pub const SETTINGS_FILE: &str = "pyqt-tools.yaml";

pub const QT_BASE_PATH: &str = "QT_BASE_PATH";
pub const PYQT5_VERSION: &str = "PYQT5_VERSION";
pub const BUILD_FOLDER: &str = "APPVEYOR_BUILD_FOLDER";
pub const BUILD_ID: &str = "APPVEYOR_BUILD_ID";
pub const JOB_ID: &str = "APPVEYOR_JOB_ID";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set in the environment or settings file")]
    Missing(&'static str),
}

/// Loads [`BuildSettings`] from YAML and layers CI environment variables on top.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a manager reading `settings_path`, or [`SETTINGS_FILE`] when `None`.
    pub fn new(settings_path: Option<&Utf8Path>) -> Self {
        Self {
            settings_path: settings_path
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|| Utf8PathBuf::from(SETTINGS_FILE)),
        }
    }

    /// Load the settings file.
    ///
    /// # Returns
    /// The loaded settings, or defaults if the file doesn't exist
    pub fn load_settings(&self) -> Result<BuildSettings> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
            return Ok(BuildSettings::default());
        }

        let file_contents = fs::read_to_string(&self.settings_path)
            .with_context(|| format!("Failed to read settings: {}", self.settings_path))?;

        let settings: BuildSettings = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::info!("Loaded settings from {}", self.settings_path);
        Ok(settings)
    }

    /// Apply CI variables from `env` over `settings`.
    ///
    /// Values present in the environment win, even when empty. Build and job
    /// ids keep the settings value otherwise, which defaults to
    /// [`LOCAL_ID`](crate::models::LOCAL_ID).
    pub fn apply_environment(&self, settings: BuildSettings, env: &Environment) -> BuildSettings {
        let mut settings = settings;

        if let Some(qt) = env.get(QT_BASE_PATH) {
            settings.qt_base_path = Some(Utf8PathBuf::from(qt));
        }
        if let Some(version) = env.get(PYQT5_VERSION) {
            settings.pyqt5_version = Some(version.to_string());
        }
        if let Some(folder) = env.get(BUILD_FOLDER) {
            settings.build_folder = Some(Utf8PathBuf::from(folder));
        }
        if let Some(id) = env.get(BUILD_ID) {
            settings.build_id = id.to_string();
        }
        if let Some(id) = env.get(JOB_ID) {
            settings.job_id = id.to_string();
        }

        settings
    }

    /// Get the settings file path.
    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }
}

impl BuildSettings {
    pub fn require_qt_base_path(&self) -> Result<&Utf8Path, ConfigError> {
        self.qt_base_path
            .as_deref()
            .ok_or(ConfigError::Missing(QT_BASE_PATH))
    }

    pub fn require_pyqt5_version(&self) -> Result<&str, ConfigError> {
        self.pyqt5_version
            .as_deref()
            .ok_or(ConfigError::Missing(PYQT5_VERSION))
    }

    /// Build folder, defaulting to the current directory.
    pub fn resolve_build_folder(&self) -> Result<Utf8PathBuf> {
        match &self.build_folder {
            Some(folder) => Ok(folder.clone()),
            None => {
                let cwd = std::env::current_dir().context("Failed to read current directory")?;
                Utf8PathBuf::from_path_buf(cwd)
                    .map_err(|p| anyhow::anyhow!("Current directory is not UTF-8: {}", p.display()))
            }
        }
    }
}
