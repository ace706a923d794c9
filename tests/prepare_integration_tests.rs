//! Integration tests for BuildDriver::prepare
//!
//! The interpreter and `cmd.exe` are answered by a scripted runner. These
//! tests verify:
//! - Settings overrides come from the captured environment, not the caller's
//! - `VCINSTALLDIR` and the Qt `bin` directory are added for later steps
//! - A missing `nmake` fails before anything is written

use camino::{Utf8Path, Utf8PathBuf};
use pyqt_tools::models::{BuildSettings, Environment, PATH_LIST_SEPARATOR};
use pyqt_tools::services::{
    BuildDriver, CommandRunner, HttpFetcher, Invocation, ProcessError, RetryPolicy,
};
use pyqt_tools::ConfigManager;
use std::cell::RefCell;
use std::fs;
use tempfile::TempDir;

/// Answers the interpreter query and the environment capture.
struct ScriptedRunner {
    set_output: String,
    calls: RefCell<Vec<Invocation>>,
}

impl ScriptedRunner {
    fn new(set_output: String) -> Self {
        Self {
            set_output,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn call_to(&self, program: &str) -> Invocation {
        self.calls
            .borrow()
            .iter()
            .find(|c| c.program() == program)
            .cloned()
            .unwrap()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn check_call(&self, invocation: &Invocation) -> Result<(), ProcessError> {
        self.calls.borrow_mut().push(invocation.clone());
        Ok(())
    }

    async fn check_output(&self, invocation: &Invocation) -> Result<Vec<u8>, ProcessError> {
        self.calls.borrow_mut().push(invocation.clone());
        if invocation.program() == "cmd.exe" {
            Ok(self.set_output.clone().into_bytes())
        } else {
            Ok(b"3 7 64\r\n".to_vec())
        }
    }

    async fn call(&self, invocation: &Invocation) -> Result<i32, ProcessError> {
        self.calls.borrow_mut().push(invocation.clone());
        Ok(0)
    }
}

struct Fixture {
    _temp_dir: TempDir,
    root: Utf8PathBuf,
    tools_bin: Utf8PathBuf,
    settings: BuildSettings,
}

fn fixture() -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let tools_bin = root.join("vs-bin");
    fs::create_dir_all(&tools_bin).unwrap();

    let settings = BuildSettings {
        python: Some(root.join("Python37").join("python.exe")),
        pyqt5_version: Some("5.11.3".to_string()),
        visual_studio_root: root.join("VS"),
        ..BuildSettings::default()
    };

    Fixture {
        _temp_dir: temp_dir,
        root,
        tools_bin,
        settings,
    }
}

fn install_nmake(dir: &Utf8Path) -> Utf8PathBuf {
    let name = if cfg!(windows) { "nmake.exe" } else { "nmake" };
    let nmake = dir.join(name);
    fs::write(&nmake, "").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&nmake, fs::Permissions::from_mode(0o755)).unwrap();
    }
    nmake
}

fn set_output(fixture: &Fixture, path: &Utf8Path) -> String {
    format!(
        "[vcvarsall.bat] Environment initialized for: 'x64'\r\n\
         \"Done running command\"\r\n\
         Path={}\r\n\
         QT_BASE_PATH={}\r\n\
         PYQT5_VERSION=5.12\r\n\
         APPVEYOR_BUILD_FOLDER={}\r\n\
         APPVEYOR_BUILD_ID=99\r\n\
         =C:=C:\\\r\n",
        path,
        fixture.root.join("Qt").join("5.12.0"),
        fixture.root.join("build"),
    )
}

fn driver(runner: ScriptedRunner) -> BuildDriver<ScriptedRunner, HttpFetcher> {
    BuildDriver::new(runner, HttpFetcher::new(), RetryPolicy::default())
}

#[tokio::test]
async fn test_prepare_plans_from_captured_environment() {
    let fixture = fixture();
    let nmake = install_nmake(&fixture.tools_bin);
    let driver = driver(ScriptedRunner::new(set_output(&fixture, &fixture.tools_bin)));
    let base: Environment = [
        ("PYQT5_VERSION".to_string(), "5.6".to_string()),
        ("SystemRoot".to_string(), "C:\\Windows".to_string()),
    ]
    .into_iter()
    .collect();

    let (plan, tools, env) = driver
        .prepare(&ConfigManager::new(None), fixture.settings.clone(), &base)
        .await
        .unwrap();

    assert_eq!(plan.release.version(), "5.12");
    assert_eq!(plan.build, fixture.root.join("build"));
    assert_eq!(plan.build_id, "99");
    assert_eq!(plan.job_id, "local");
    assert_eq!(
        plan.qt_compiler_path,
        fixture.root.join("Qt").join("5.12.0").join("msvc2017_64")
    );
    assert_eq!(
        plan.toolchain.visual_studio,
        fixture
            .root
            .join("VS")
            .join("Microsoft Visual Studio")
            .join("2017")
            .join("Community")
    );

    assert_eq!(env.get("VCINSTALLDIR"), Some(plan.toolchain.visual_studio.as_str()));
    assert_eq!(
        env.get("PATH").unwrap(),
        format!("{}{}{}", fixture.tools_bin, PATH_LIST_SEPARATOR, plan.qt_bin())
    );
    assert!(!env.contains("SystemRoot"));

    assert_eq!(tools.python, fixture.root.join("Python37").join("python.exe"));
    assert_eq!(tools.nmake, nmake);

    let runner = driver.runner();
    let query = runner.call_to(tools.python.as_str());
    assert_eq!(query.arguments()[0], "-c");
    assert_eq!(query.environment(), Some(&base));

    let capture = runner.call_to("cmd.exe");
    assert_eq!(capture.environment(), Some(&base));
    assert!(capture.is_verbatim());
    assert!(capture.arguments()[2].contains("vcvarsall.bat\" x64 && echo"));
}

#[tokio::test]
async fn test_prepare_fails_early_without_nmake() {
    let fixture = fixture();
    let driver = driver(ScriptedRunner::new(set_output(&fixture, &fixture.tools_bin)));

    let err = driver
        .prepare(&ConfigManager::new(None), fixture.settings.clone(), &Environment::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("nmake"), "{err:#}");
    assert!(!fixture.root.join("build").exists());
}

#[tokio::test]
async fn test_prepare_requires_qt_base_path() {
    let fixture = fixture();
    let output = "\"Done running command\"\r\nPYQT5_VERSION=5.12\r\n".to_string();
    let driver = driver(ScriptedRunner::new(output));

    let err = driver
        .prepare(&ConfigManager::new(None), fixture.settings.clone(), &Environment::new())
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("QT_BASE_PATH"), "{err:#}");
}
