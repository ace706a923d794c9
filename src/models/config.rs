use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Build settings from `pyqt-tools.yaml`, overridden by CI environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Interpreter used for `configure.py`; resolved on `PATH` when unset.
    pub python: Option<Utf8PathBuf>,

    /// Overrides the probed pointer width of the interpreter.
    pub bits: Option<u32>,

    pub qt_base_path: Option<Utf8PathBuf>,

    pub pyqt5_version: Option<String>,

    /// Root of the checkout; the current directory when unset.
    pub build_folder: Option<Utf8PathBuf>,

    pub build_id: String,

    pub job_id: String,

    pub visual_studio_root: Utf8PathBuf,

    /// Pattern that disqualifies an application when found in its dry-run dependency list.
    pub excluded_component: String,

    pub redist_ordering: RedistOrdering,

    pub download: DownloadSettings,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            python: None,
            bits: None,
            qt_base_path: None,
            pyqt5_version: None,
            build_folder: None,
            build_id: LOCAL_ID.to_string(),
            job_id: LOCAL_ID.to_string(),
            visual_studio_root: Utf8PathBuf::from("C:/Program Files (x86)"),
            excluded_component: "WebEngine".to_string(),
            redist_ordering: RedistOrdering::default(),
            download: DownloadSettings::default(),
        }
    }
}

/// Build and job id used outside of CI.
pub const LOCAL_ID: &str = "local";

/// How redistributable version directories are ranked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedistOrdering {
    /// Dot-separated components compared as strings, so `14.9.5` beats `14.29.30`.
    #[default]
    Lexicographic,
    /// Dot-separated components compared as integers.
    Numeric,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub attempts: u32,
    pub initial_delay_secs: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay_secs: 30,
        }
    }
}
