//! Data models for the build driver and launchers.
//!
//! - [`Toolchain`]: compiler parameters derived from interpreter architecture and version
//! - [`PyQtRelease`]: upstream PyQt5/SIP release tables and version-gated build knobs
//! - [`Environment`]: immutable environment value threaded through every child process
//! - [`BuildSettings`]: settings loaded from `pyqt-tools.yaml` and CI variables
//!
//! Lookups into the version tables fail with [`ToolchainError`] instead of
//! falling back to a neighbouring version.

pub mod config;
pub mod environment;
pub mod toolchain;
pub mod versions;

pub use config::{BuildSettings, DownloadSettings, LOCAL_ID, RedistOrdering};
pub use environment::{Environment, PATH_LIST_SEPARATOR, join_search_path};
pub use toolchain::{Bitness, MsvcVersion, PythonVersion, Toolchain, ToolchainError};
pub use versions::{PyQtRelease, SipRelease};
