//! The build driver.
//!
//! [`BuildDriver::prepare`] probes the interpreter, captures the compiler
//! environment and lays out every path in a [`BuildPlan`].
//! [`BuildDriver::execute`] then runs the fixed sequence of toolchain steps
//! against that plan. The [`Environment`] produced by the capture is threaded
//! through each step by value; steps that change it return the new value.

use super::deploy::{
    self, WindeployqtProbe, copy_into, copy_qml_tree, copy_redist_files,
    discover_applications, select_applications, single_plugin,
};
use super::download::{Downloader, Fetch, RetryPolicy};
use super::entry_points::{self, BuildResults, ENTRY_POINTS_FILE, PACKAGE};
use super::environment::capture_batch_environment;
use super::process::{CommandRunner, Invocation};
use crate::config::ConfigManager;
use crate::models::{
    Bitness, BuildSettings, Environment, PyQtRelease, PythonVersion, RedistOrdering, Toolchain,
    ToolchainError,
};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;

/// Prints major, minor and pointer width of the running interpreter.
pub const PYTHON_PROBE: &str =
    "import struct, sys; print(sys.version_info[0], sys.version_info[1], struct.calcsize('P') * 8)";

/// Define appended to `designer.pro-in` so the plugin links the right Python DLL.
pub const DESIGNER_PYTHON_LIB_DEFINE: &str = r#"DEFINES     += PYTHON_LIB='"\\\"@PYSHLIB@\\\""'"#;

/// Only the platform plugin Designer needs when run headless in CI.
pub const PLATFORM_PLUGINS: [&str; 1] = ["minimal"];

/// Parse the output of [`PYTHON_PROBE`].
pub fn parse_python_probe(output: &str) -> Result<(PythonVersion, u32), ToolchainError> {
    let malformed = || ToolchainError::MalformedProbe(output.to_string());
    let numbers = output
        .split_whitespace()
        .map(|n| n.parse::<u32>().map_err(|_| malformed()))
        .collect::<Result<Vec<_>, _>>()?;

    match numbers.as_slice() {
        [major, minor, bits] => Ok((PythonVersion::new(*major, *minor), *bits)),
        _ => Err(malformed()),
    }
}

/// External programs the build calls by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tools {
    pub python: Utf8PathBuf,
    pub nmake: Utf8PathBuf,
}

impl Tools {
    /// `sip.exe` installed next to the interpreter.
    pub fn sip(&self) -> Utf8PathBuf {
        self.python.with_file_name("sip.exe")
    }
}

/// Every path the build reads or writes, derived up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub toolchain: Toolchain,
    pub release: PyQtRelease,
    pub build: Utf8PathBuf,
    pub qt_compiler_path: Utf8PathBuf,
    pub build_id: String,
    pub job_id: String,
    pub excluded_component: String,
    pub redist_ordering: RedistOrdering,
}

impl BuildPlan {
    pub fn new(
        toolchain: Toolchain,
        release: PyQtRelease,
        build: Utf8PathBuf,
        qt_base_path: &Utf8Path,
        settings: &BuildSettings,
    ) -> Self {
        let qt_compiler_path = qt_base_path.join(toolchain.qt_compiler_dir());
        Self {
            toolchain,
            release,
            build,
            qt_compiler_path,
            build_id: settings.build_id.clone(),
            job_id: settings.job_id.clone(),
            excluded_component: settings.excluded_component.clone(),
            redist_ordering: settings.redist_ordering,
        }
    }

    pub fn qt_bin(&self) -> Utf8PathBuf {
        self.qt_compiler_path.join("bin")
    }

    pub fn windeployqt(&self) -> Utf8PathBuf {
        self.qt_bin().join("windeployqt.exe")
    }

    pub fn setup_cfg(&self) -> Utf8PathBuf {
        self.build.join("setup.cfg")
    }

    pub fn src(&self) -> Utf8PathBuf {
        self.build.join("src")
    }

    pub fn destination(&self) -> Utf8PathBuf {
        self.src().join(PACKAGE)
    }

    pub fn examples_destination(&self) -> Utf8PathBuf {
        self.destination().join("examples")
    }

    pub fn destination_qt(&self) -> Utf8PathBuf {
        self.destination().join("Qt")
    }

    pub fn destination_qt_bin(&self) -> Utf8PathBuf {
        self.destination_qt().join("bin")
    }

    pub fn destination_plugins(&self) -> Utf8PathBuf {
        self.destination_qt_bin().join("plugins")
    }

    pub fn sysroot(&self) -> Utf8PathBuf {
        self.build.join("sysroot")
    }

    pub fn native(&self) -> Utf8PathBuf {
        self.sysroot().join("native")
    }

    pub fn sip_source(&self) -> Utf8PathBuf {
        self.src().join(self.release.sip().archive_name())
    }

    pub fn sip_native_source(&self) -> Utf8PathBuf {
        self.src()
            .join(format!("{}-native", self.release.sip().archive_name()))
    }

    pub fn pyqt5_source(&self) -> Utf8PathBuf {
        self.src().join(self.release.archive_name())
    }

    pub fn pyqt5_install(&self) -> Utf8PathBuf {
        self.sysroot().join("pyqt5-install")
    }

    pub fn designer_plugin_install(&self) -> Utf8PathBuf {
        self.pyqt5_install().join("designer")
    }

    pub fn qml_plugin_install(&self) -> Utf8PathBuf {
        self.pyqt5_install().join("qml")
    }

    /// Patch files live at the root of the checkout.
    pub fn pluginloader_patch(&self) -> Option<Utf8PathBuf> {
        self.release
            .pluginloader_patch()
            .map(|name| self.build.join(name))
    }

    pub fn redist_crt_dir(&self, version_dir: &Utf8Path) -> Utf8PathBuf {
        version_dir
            .join(self.toolchain.bitness.arch())
            .join(self.toolchain.crt_dir_name())
    }
}

/// Drives a full build using `runner` for child processes and `fetcher` for downloads.
pub struct BuildDriver<R, F> {
    runner: R,
    downloader: Downloader<F>,
}

impl<R: CommandRunner, F: Fetch> BuildDriver<R, F> {
    pub fn new(runner: R, fetcher: F, policy: RetryPolicy) -> Self {
        Self {
            runner,
            downloader: Downloader::new(fetcher, policy),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Probe the interpreter, capture the compiler environment and plan the build.
    pub async fn prepare(
        &self,
        config: &ConfigManager,
        settings: BuildSettings,
        base: &Environment,
    ) -> Result<(BuildPlan, Tools, Environment)> {
        let python = match &settings.python {
            Some(python) => python.clone(),
            None => find_program("python", base)?,
        };

        let probe = Invocation::new(python.as_str())
            .args(["-c", PYTHON_PROBE])
            .env(base);
        let output = self
            .runner
            .check_output(&probe)
            .await
            .context("Failed to probe the Python interpreter")?;
        let (python_version, probed_bits) =
            parse_python_probe(String::from_utf8_lossy(&output).trim())?;

        let bitness = Bitness::from_bits(settings.bits.unwrap_or(probed_bits))?;
        let toolchain = Toolchain::derive(bitness, python_version, &settings.visual_studio_root)?;
        tracing::info!(
            "Python {} ({}-bit) builds with MSVC {} ({})",
            python_version,
            bitness.bits(),
            toolchain.msvc,
            toolchain.compiler_year()
        );

        let vcvarsall = toolchain.vcvarsall();
        let env = capture_batch_environment(
            &self.runner,
            &[vcvarsall.as_str(), bitness.arch()],
            base,
        )
        .await
        .with_context(|| format!("Failed to capture environment from {}", vcvarsall))?;
        let env = env.with("VCINSTALLDIR", toolchain.visual_studio.as_str());
        tracing::debug!("  ---- captured environment:\n{}", env);

        let settings = config.apply_environment(settings, &env);
        let qt_base_path = settings.require_qt_base_path()?.to_path_buf();
        let release = PyQtRelease::lookup(settings.require_pyqt5_version()?)?;
        let build = settings.resolve_build_folder()?;

        let plan = BuildPlan::new(toolchain, release, build, &qt_base_path, &settings);
        let env = env.with_path_appended("PATH", plan.qt_bin().as_str());

        let nmake = find_program("nmake", &env)?;
        Ok((plan, Tools { python, nmake }, env))
    }

    /// Run every build step of `plan` and return the generated console scripts.
    pub async fn execute(
        &self,
        plan: &BuildPlan,
        tools: &Tools,
        env: Environment,
    ) -> Result<BuildResults> {
        write_file(&plan.setup_cfg(), &plan.toolchain.setup_cfg())?;

        let destination = plan.destination();
        create_dir(&destination)?;
        deploy::write_build_metadata(&destination, &plan.build_id, &plan.job_id)?;

        let applications = self.deploy_applications(plan, &env).await?;
        entry_points::append_entry_points(&destination.join(ENTRY_POINTS_FILE), &applications)?;
        let results = BuildResults::from_applications(&applications);

        self.copy_platform_plugins(plan)?;

        create_dir(&plan.sysroot())?;
        create_dir(&plan.native())?;

        let env = self.build_sip(plan, tools, env).await?;
        self.build_pyqt5(plan, tools, &env).await?;

        self.copy_pyqt5_plugins(plan)?;
        copy_qml_tree(
            &plan.qt_compiler_path.join("qml"),
            &plan.destination_qt().join("qml"),
        )?;
        fs::copy(
            plan.pyqt5_source().join("LICENSE"),
            destination.join("LICENSE.pyqt5"),
        )
        .context("Failed to copy the PyQt5 license")?;

        self.copy_redistributables(plan)?;

        tracing::debug!("Destination tree:\n{}", deploy::list_tree(&destination));
        Ok(results)
    }

    /// Copy admitted Qt applications into the bundle and deploy their dependencies.
    async fn deploy_applications(&self, plan: &BuildPlan, env: &Environment) -> Result<Vec<String>> {
        let destination_qt_bin = plan.destination_qt_bin();
        create_dir(&destination_qt_bin)?;

        let excluded = Regex::new(&plan.excluded_component).with_context(|| {
            format!("Invalid excluded component pattern: {}", plan.excluded_component)
        })?;
        let probe = WindeployqtProbe::new(
            &self.runner,
            plan.windeployqt(),
            plan.destination(),
            env.clone(),
            excluded,
        );

        let candidates = discover_applications(&plan.qt_bin())?;
        let applications = select_applications(candidates, &probe).await?;

        let mut names = Vec::new();
        for application in applications {
            let copied = copy_into(&application, &destination_qt_bin)?;
            let file_name = copied.file_name().unwrap_or_default().to_string();

            let deploy = Invocation::new(plan.windeployqt().as_str())
                .arg(file_name)
                .cwd(&destination_qt_bin)
                .env(env);
            self.runner.check_call(&deploy).await?;

            if let Some(stem) = application.file_stem() {
                names.push(stem.to_string());
            }
        }
        Ok(names)
    }

    fn copy_platform_plugins(&self, plan: &BuildPlan) -> Result<()> {
        let platforms = plan.destination_plugins().join("platforms");
        for plugin in PLATFORM_PLUGINS {
            let source = plan
                .qt_compiler_path
                .join("plugins")
                .join("platforms")
                .join(format!("q{}.dll", plugin));
            copy_into(&source, &platforms)?;
        }
        Ok(())
    }

    /// Fetch SIP and build it twice: natively for the code generator, then as the target module.
    async fn build_sip(&self, plan: &BuildPlan, tools: &Tools, env: Environment) -> Result<Environment> {
        let src = plan.src();
        self.downloader
            .download_and_extract(&plan.release.sip().url(), &src)
            .await?;

        let sip = plan.sip_source();
        let sip_native = plan.sip_native_source();
        deploy::copy_tree(&sip, &sip_native, &|_: &Utf8Path, _: &BTreeSet<String>| {
            BTreeSet::new()
        })?;

        let env = env.with("CL", plan.toolchain.cl_include(&plan.sysroot()));

        self.configure_and_install(tools, &sip_native, Vec::new(), &env)
            .await?;
        let mut extras = vec!["--no-tools".to_string()];
        extras.extend(plan.release.sip_configure_extras());
        self.configure_and_install(tools, &sip, extras, &env).await?;

        Ok(env)
    }

    /// `python configure.py ...`, `nmake`, `nmake install` in `dir`.
    async fn configure_and_install(
        &self,
        tools: &Tools,
        dir: &Utf8Path,
        configure_args: Vec<String>,
        env: &Environment,
    ) -> Result<()> {
        let configure = Invocation::new(tools.python.as_str())
            .arg("configure.py")
            .args(configure_args)
            .cwd(dir)
            .env(env);
        self.runner.check_call(&configure).await?;

        let nmake = Invocation::new(tools.nmake.as_str()).cwd(dir).env(env);
        self.runner.check_call(&nmake).await?;

        let install = Invocation::new(tools.nmake.as_str())
            .arg("install")
            .cwd(dir)
            .env(env);
        self.runner.check_call(&install).await?;
        Ok(())
    }

    async fn build_pyqt5(&self, plan: &BuildPlan, tools: &Tools, env: &Environment) -> Result<()> {
        self.downloader
            .download_and_extract(&plan.release.url(), &plan.src())
            .await?;
        let pyqt5 = plan.pyqt5_source();

        if let Some(patch) = plan.pluginloader_patch() {
            let apply = Invocation::new("patch")
                .args(["-p", "1", "-i", patch.as_str()])
                .cwd(&pyqt5)
                .env(env)
                .shell();
            self.runner.check_call(&apply).await?;
        }

        let designer_plugins = plan.designer_plugin_install();
        let qml_plugins = plan.qml_plugin_install();
        create_dir(&designer_plugins)?;
        create_dir(&qml_plugins)?;

        let designer_pro = pyqt5.join("designer").join("designer.pro-in");
        let mut pro = OpenOptions::new()
            .append(true)
            .open(&designer_pro)
            .with_context(|| format!("Failed to open {}", designer_pro))?;
        write!(pro, "\n{}\n", DESIGNER_PYTHON_LIB_DEFINE)
            .with_context(|| format!("Failed to append to {}", designer_pro))?;

        let configure_args = vec![
            "--no-tools".to_string(),
            "--no-qsci-api".to_string(),
            "--confirm-license".to_string(),
            "--enable=QtDesigner".to_string(),
            format!("--designer-plugindir={}", designer_plugins),
            "--enable=QtQml".to_string(),
            "--enable=QtQuick".to_string(),
            format!("--qml-plugindir={}", qml_plugins),
            "--verbose".to_string(),
            format!("--sip={}", tools.sip()),
        ];
        self.configure_and_install(tools, &pyqt5, configure_args, env)
            .await
    }

    fn copy_pyqt5_plugins(&self, plan: &BuildPlan) -> Result<()> {
        let plugins = plan.destination_plugins();

        let designer_plugin = single_plugin(&plan.designer_plugin_install())?;
        copy_into(&designer_plugin, &plugins.join("designer"))?;

        let qml_plugin = single_plugin(&plan.qml_plugin_install())?;
        copy_into(&qml_plugin, &plugins)?;
        copy_into(&qml_plugin, &plan.examples_destination())?;
        Ok(())
    }

    /// windeployqt's `--compiler-runtime` does not work, so the CRT is copied directly.
    fn copy_redistributables(&self, plan: &BuildPlan) -> Result<()> {
        let root = plan.toolchain.redist_root();
        let version_dir = if plan.toolchain.msvc.is_modern() {
            deploy::resolve_redist_version_dir(&root, plan.redist_ordering)?
        } else {
            root
        };

        let crt = plan.redist_crt_dir(&version_dir);
        let copied = copy_redist_files(&crt, &plan.destination())?;
        tracing::info!("Copied {} redistributable files from {}", copied.len(), crt);
        Ok(())
    }
}

fn find_program(name: &str, env: &Environment) -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let found = which::which_in(name, env.get("PATH"), cwd)
        .with_context(|| format!("{} not found on PATH", name))?;
    Utf8PathBuf::from_path_buf(found)
        .map_err(|p| anyhow::anyhow!("{} is not a UTF-8 path", p.display()))
}

fn create_dir(path: &Utf8Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("Failed to create {}", path))
}

fn write_file(path: &Utf8Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("Failed to write {}", path))
}
