// pyqt-tools - Qt Designer bundle with PyQt5 plugins
//
// This is the library crate containing the build driver, the launchers and their data structures.
// The binary crate (main.rs) provides the command line entry point.

pub mod cli;
pub mod config;
pub mod logging;
pub mod models;
pub mod services;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use models::{BuildSettings, Environment, PyQtRelease, Toolchain};
pub use services::{BuildDriver, BuildResults, SystemRunner};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
