//! Launchers for the bundled Qt tools.
//!
//! The designer launcher extends `PYQTDESIGNERPATH` and `PYTHONPATH` so
//! Designer finds Python widget plugins, then runs the bundled executable
//! and hands back its exit code unchanged.

use super::process::{CommandRunner, Invocation, ProcessError};
use crate::models::{Environment, join_search_path};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

pub const DESIGNER_PATH_VAR: &str = "PYQTDESIGNERPATH";
pub const PYTHON_PATH_VAR: &str = "PYTHONPATH";

/// Paths inside an installed tools package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolsLayout {
    root: Utf8PathBuf,
}

impl ToolsLayout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn qt_bin(&self) -> Utf8PathBuf {
        self.root.join("Qt").join("bin")
    }

    pub fn application(&self, name: &str) -> Utf8PathBuf {
        self.qt_bin().join(format!("{}.exe", name))
    }

    pub fn designer(&self) -> Utf8PathBuf {
        self.application("designer")
    }

    /// Widget plugin shipped as a working example.
    pub fn example_widget_path(&self) -> Utf8PathBuf {
        self.root.join("examplebuttonplugin")
    }

    /// Widget plugin that raises on import, for checking Designer's error dialog.
    pub fn bad_plugin_path(&self) -> Utf8PathBuf {
        self.root.join("badplugin")
    }

    /// Directory that makes the package importable.
    pub fn python_path(&self) -> Utf8PathBuf {
        self.root
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone())
    }

    pub fn bin(&self) -> Utf8PathBuf {
        self.root.join("bin")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesignerOptions {
    pub widget_paths: Vec<Utf8PathBuf>,
    pub example_widget_path: bool,
    pub designer_help: bool,
    pub test_exception_dialog: bool,
    pub args: Vec<String>,
}

/// Environment for Designer with both search paths extended.
pub fn designer_environment(
    layout: &ToolsLayout,
    options: &DesignerOptions,
    base: &Environment,
) -> Environment {
    let mut widget_paths: Vec<String> = options
        .widget_paths
        .iter()
        .map(|p| p.to_string())
        .collect();
    if options.example_widget_path {
        widget_paths.push(layout.example_widget_path().to_string());
    }
    if options.test_exception_dialog {
        widget_paths.push(layout.bad_plugin_path().to_string());
    }

    let designer_path = join_search_path(&widget_paths, base.get(DESIGNER_PATH_VAR));
    let python_path = join_search_path(
        &[layout.python_path().to_string()],
        base.get(PYTHON_PATH_VAR),
    );

    base.with(DESIGNER_PATH_VAR, designer_path)
        .with(PYTHON_PATH_VAR, python_path)
}

/// Arguments passed to Designer.
pub fn designer_arguments(options: &DesignerOptions) -> Vec<String> {
    let mut args = Vec::new();
    if options.designer_help {
        args.push("--help".to_string());
    }
    args.extend(options.args.iter().cloned());
    args
}

pub const DOTENV_FILE: &str = ".env";

/// Nearest `.env` in `start` or one of its ancestors.
pub fn find_dotenv(start: &Utf8Path) -> Option<Utf8PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(DOTENV_FILE))
        .find(|candidate| candidate.is_file())
}

/// `base` plus the variables of the nearest `.env` above `start` that are
/// not already set.
pub fn environment_with_dotenv(base: Environment, start: &Utf8Path) -> Environment {
    let Some(path) = find_dotenv(start) else {
        return base;
    };
    tracing::debug!("Loading {}", path);

    match dotenvy::from_path_iter(&path) {
        Ok(iter) => base.merged_missing(iter.filter_map(|item| match item {
            Ok(pair) => Some(pair),
            Err(e) => {
                tracing::warn!("Ignoring malformed entry in {}: {}", path, e);
                None
            }
        })),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path, e);
            base
        }
    }
}

/// Run Designer with extended plugin search paths.
pub async fn launch_designer<R: CommandRunner>(
    runner: &R,
    layout: &ToolsLayout,
    options: &DesignerOptions,
    base: &Environment,
) -> Result<i32, ProcessError> {
    let env = designer_environment(layout, options, base);
    for name in [DESIGNER_PATH_VAR, PYTHON_PATH_VAR] {
        tracing::info!("{}: {}", name, env.get(name).unwrap_or_default());
    }

    let invocation = Invocation::new(layout.designer().as_str())
        .args(designer_arguments(options))
        .env(&env);
    runner.call(&invocation).await
}

/// Run the bundled application `name` with `args`.
pub async fn run_application<R: CommandRunner>(
    runner: &R,
    layout: &ToolsLayout,
    name: &str,
    args: &[String],
    env: &Environment,
) -> Result<i32, ProcessError> {
    let invocation = Invocation::new(layout.application(name).as_str())
        .args(args.iter().cloned())
        .env(env);
    runner.call(&invocation).await
}

/// Copy `pyuic5.exe` next to `python` into the package's `bin` as `uic.exe`.
pub fn install_uic(layout: &ToolsLayout, python: &Utf8Path) -> Result<Utf8PathBuf> {
    let there = python
        .parent()
        .with_context(|| format!("{} has no parent directory", python))?;
    let source = there.join("pyuic5.exe");

    let destination = layout.bin();
    fs::create_dir_all(&destination)
        .with_context(|| format!("Failed to create {}", destination))?;

    let target = destination.join("uic.exe");
    fs::copy(&source, &target)
        .with_context(|| format!("Failed to copy {} to {}", source, target))?;
    tracing::info!("Installed {} as {}", source, target);
    Ok(target)
}
