//! Integration tests for the launchers and generated entry points
//!
//! These tests verify:
//! - Designer is started from the bundle with extended search paths
//! - Exit codes pass through unchanged
//! - Bundled applications run with their arguments forwarded
//! - Console scripts and entry point stubs agree

use camino::{Utf8Path, Utf8PathBuf};
use pyqt_tools::models::{Environment, PATH_LIST_SEPARATOR};
use pyqt_tools::services::entry_points::{ENTRY_POINTS_FILE, append_entry_points};
use pyqt_tools::services::launcher::{
    DESIGNER_PATH_VAR, PYTHON_PATH_VAR, launch_designer, run_application,
};
use pyqt_tools::services::{
    BuildResults, CommandRunner, DesignerOptions, Invocation, ProcessError, ToolsLayout,
};
use std::cell::RefCell;
use std::fs;
use tempfile::TempDir;

/// Returns a fixed exit code and keeps the last invocation.
struct ExitCodeRunner {
    code: i32,
    last: RefCell<Option<Invocation>>,
}

impl ExitCodeRunner {
    fn new(code: i32) -> Self {
        Self {
            code,
            last: RefCell::new(None),
        }
    }

    fn last(&self) -> Invocation {
        self.last.borrow().clone().unwrap()
    }
}

impl CommandRunner for ExitCodeRunner {
    async fn check_call(&self, invocation: &Invocation) -> Result<(), ProcessError> {
        *self.last.borrow_mut() = Some(invocation.clone());
        Ok(())
    }

    async fn check_output(&self, invocation: &Invocation) -> Result<Vec<u8>, ProcessError> {
        *self.last.borrow_mut() = Some(invocation.clone());
        Ok(Vec::new())
    }

    async fn call(&self, invocation: &Invocation) -> Result<i32, ProcessError> {
        *self.last.borrow_mut() = Some(invocation.clone());
        Ok(self.code)
    }
}

fn environment(pairs: &[(&str, &str)]) -> Environment {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_designer_exit_code_passes_through() {
    let layout = ToolsLayout::new("/site-packages/pyqt5_tools");
    let runner = ExitCodeRunner::new(3);
    let options = DesignerOptions {
        designer_help: true,
        args: vec!["form.ui".to_string()],
        ..DesignerOptions::default()
    };

    let code = launch_designer(&runner, &layout, &options, &Environment::new())
        .await
        .unwrap();
    assert_eq!(code, 3);

    let invocation = runner.last();
    assert_eq!(
        invocation.program(),
        Utf8Path::new("/site-packages/pyqt5_tools")
            .join("Qt")
            .join("bin")
            .join("designer.exe")
            .as_str()
    );
    assert_eq!(invocation.arguments(), ["--help", "form.ui"]);
}

#[tokio::test]
async fn test_designer_environment_keeps_existing_entries() {
    let layout = ToolsLayout::new("/site-packages/pyqt5_tools");
    let runner = ExitCodeRunner::new(0);
    let options = DesignerOptions {
        widget_paths: vec![Utf8PathBuf::from("/work/widgets")],
        ..DesignerOptions::default()
    };
    let base = environment(&[
        (DESIGNER_PATH_VAR, "/already/there"),
        (PYTHON_PATH_VAR, "/lib/python"),
        ("QT_DEBUG_PLUGINS", "1"),
    ]);

    launch_designer(&runner, &layout, &options, &base)
        .await
        .unwrap();

    let invocation = runner.last();
    let env = invocation.environment().unwrap();
    let sep = PATH_LIST_SEPARATOR;
    assert_eq!(
        env.get(DESIGNER_PATH_VAR).unwrap(),
        format!("/work/widgets{sep}/already/there{sep}")
    );
    assert_eq!(
        env.get(PYTHON_PATH_VAR).unwrap(),
        format!("/site-packages{sep}/lib/python{sep}")
    );
    assert_eq!(env.get("QT_DEBUG_PLUGINS"), Some("1"));
    assert!(invocation.arguments().is_empty());
}

#[tokio::test]
async fn test_run_application_forwards_arguments() {
    let layout = ToolsLayout::new("/pkg");
    let runner = ExitCodeRunner::new(1);
    let env = environment(&[("LANG", "C")]);
    let args = vec!["--release".to_string(), "app.ts".to_string()];

    let code = run_application(&runner, &layout, "lrelease", &args, &env)
        .await
        .unwrap();
    assert_eq!(code, 1);

    let invocation = runner.last();
    assert_eq!(invocation.program(), layout.application("lrelease").as_str());
    assert_eq!(invocation.arguments(), args.as_slice());
    assert_eq!(invocation.environment(), Some(&env));
}

#[test]
fn test_console_scripts_match_generated_stubs() {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let module = root.join(ENTRY_POINTS_FILE);
    let names = ["designer", "qmlscene"];

    append_entry_points(&module, &names).unwrap();
    let results = BuildResults::from_applications(&names);

    let content = fs::read_to_string(&module).unwrap();
    for script in &results.console_scripts {
        let (name, target) = script.split_once(" = ").unwrap();
        assert_eq!(target, format!("pyqt5_tools.entrypoints:{}", name));
        assert!(content.contains(&format!("def {}():", name)));
        assert!(content.contains(&format!("'{}.exe'", name)));
    }
}

#[test]
fn test_entry_points_create_module() {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let module = root.join(ENTRY_POINTS_FILE);

    append_entry_points(&module, &["linguist"]).unwrap();

    let content = fs::read_to_string(&module).unwrap();
    assert!(content.starts_with("def linguist():\n    load_dotenv()\n"));
}
