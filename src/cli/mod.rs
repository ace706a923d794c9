//! Command line surface: `build`, `designer`, `run` and `install-uic`.

use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::ConfigManager;
use crate::models::Environment;
use crate::services::launcher::{
    self, DesignerOptions, ToolsLayout, environment_with_dotenv, launch_designer,
    run_application,
};
use crate::services::{BuildDriver, HttpFetcher, RetryPolicy, SystemRunner};

/// Overrides the package directory the launchers operate on.
pub const ROOT_VAR: &str = "PYQT_TOOLS_ROOT";

const LOG_DIR: &str = "logs";

#[derive(Debug, Parser)]
#[command(
    name = "pyqt-tools",
    version,
    about = "Qt Designer and friends, bundled with the PyQt5 plugins"
)]
pub struct Cli {
    /// Package directory holding the Qt tree (defaults to the executable's directory)
    #[arg(long, value_hint = ValueHint::DirPath)]
    root: Option<Utf8PathBuf>,

    /// Log at debug level
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the Designer bundle from a Qt installation
    Build(BuildArgs),
    /// Launch Qt Designer with Python widget plugins available
    Designer(DesignerArgs),
    /// Run a bundled Qt application
    #[command(disable_help_flag = true)]
    Run(RunArgs),
    /// Install pyuic5 as bin/uic.exe
    InstallUic(InstallUicArgs),
}

#[derive(Debug, Args)]
struct BuildArgs {
    /// Settings file (defaults to pyqt-tools.yaml in the working directory)
    #[arg(long, value_hint = ValueHint::FilePath)]
    settings: Option<Utf8PathBuf>,

    /// Log at debug level
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Debug, Args)]
struct DesignerArgs {
    /// Paths to be combined with PYQTDESIGNERPATH
    #[arg(
        short = 'p',
        long = "widget-path",
        value_parser = parse_widget_path,
        value_hint = ValueHint::DirPath
    )]
    widget_paths: Vec<Utf8PathBuf>,

    /// Include the path for the example button plugin
    #[arg(long, action = ArgAction::SetTrue)]
    example_widget_path: bool,

    /// Pass through to get Designer's --help
    #[arg(long, action = ArgAction::SetTrue)]
    designer_help: bool,

    /// Load a plugin that raises, to check the exception dialog
    #[arg(long, action = ArgAction::SetTrue)]
    test_exception_dialog: bool,

    /// Arguments forwarded to Designer, starting at the first one not listed above
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Application name, e.g. `linguist`
    name: String,

    /// Arguments forwarded to the application, `--help` included
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Debug, Args)]
struct InstallUicArgs {
    /// Python interpreter whose directory holds pyuic5.exe (defaults to `python` on PATH)
    #[arg(long, value_hint = ValueHint::FilePath)]
    python: Option<Utf8PathBuf>,
}

impl DesignerArgs {
    fn into_options(self) -> DesignerOptions {
        DesignerOptions {
            widget_paths: self.widget_paths,
            example_widget_path: self.example_widget_path,
            designer_help: self.designer_help,
            test_exception_dialog: self.test_exception_dialog,
            args: self.args,
        }
    }
}

/// Widget paths must be existing directories and are made absolute.
fn parse_widget_path(value: &str) -> Result<Utf8PathBuf, String> {
    let path = Utf8Path::new(value);
    if !path.is_dir() {
        return Err(format!("directory '{}' does not exist", value));
    }
    let absolute = std::path::absolute(path).map_err(|e| e.to_string())?;
    Utf8PathBuf::from_path_buf(absolute)
        .map_err(|p| format!("path '{}' is not valid UTF-8", p.display()))
}

/// Package directory from `--root`, then [`ROOT_VAR`], then the executable's directory.
pub fn resolve_root(explicit: Option<&Utf8Path>, env: &Environment) -> Result<Utf8PathBuf> {
    if let Some(root) = explicit {
        return Ok(root.to_path_buf());
    }
    if let Some(root) = env.get(ROOT_VAR).filter(|r| !r.is_empty()) {
        return Ok(Utf8PathBuf::from(root));
    }

    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    let exe = Utf8PathBuf::from_path_buf(exe)
        .map_err(|p| anyhow!("Executable path is not UTF-8: {}", p.display()))?;
    exe.parent()
        .map(Utf8Path::to_path_buf)
        .with_context(|| format!("{} has no parent directory", exe))
}

fn working_dir() -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| anyhow!("Working directory is not UTF-8: {}", p.display()))
}

impl Cli {
    /// `--verbose` before the subcommand, or after `build`.
    ///
    /// Launcher arguments are never inspected, they belong to the child.
    pub fn verbose(&self) -> bool {
        match &self.command {
            Command::Build(args) => self.verbose || args.verbose,
            _ => self.verbose,
        }
    }

    /// Install the subscriber for this command.
    ///
    /// `build` keeps a rolling log file under `logs/`; the launchers log to
    /// stderr only. The returned guard must outlive the command.
    pub fn init_logging(&self) -> Result<Option<WorkerGuard>> {
        match self.command {
            Command::Build(_) => crate::logging::setup_logging_with_console(
                LOG_DIR,
                crate::APP_NAME,
                self.verbose(),
            )
            .map(Some),
            _ => crate::logging::setup_console_logging(self.verbose()).map(|()| None),
        }
    }

    /// Execute the selected command and return the process exit code.
    pub async fn run(self) -> Result<i32> {
        let base = Environment::from_process();
        match self.command {
            Command::Build(args) => run_build(args, &base).await,
            Command::Designer(args) => {
                let layout = ToolsLayout::new(resolve_root(self.root.as_deref(), &base)?);
                let env = environment_with_dotenv(base, &working_dir()?);
                let options = args.into_options();
                let code = launch_designer(&SystemRunner, &layout, &options, &env).await?;
                Ok(code)
            }
            Command::Run(args) => {
                let layout = ToolsLayout::new(resolve_root(self.root.as_deref(), &base)?);
                let env = environment_with_dotenv(base, &working_dir()?);
                let code =
                    run_application(&SystemRunner, &layout, &args.name, &args.args, &env).await?;
                Ok(code)
            }
            Command::InstallUic(args) => {
                let layout = ToolsLayout::new(resolve_root(self.root.as_deref(), &base)?);
                let python = match args.python {
                    Some(python) => python,
                    None => {
                        let found = which::which("python")
                            .context("Failed to find python on PATH")?;
                        Utf8PathBuf::from_path_buf(found).map_err(|p| {
                            anyhow!("Python path is not UTF-8: {}", p.display())
                        })?
                    }
                };
                launcher::install_uic(&layout, &python)?;
                Ok(0)
            }
        }
    }
}

async fn run_build(args: BuildArgs, base: &Environment) -> Result<i32> {
    tracing::info!("Starting {} v{}", crate::APP_NAME, crate::VERSION);

    let config = ConfigManager::new(args.settings.as_deref());
    let settings = config.load_settings()?;
    let policy = RetryPolicy::from(&settings.download);

    let driver = BuildDriver::new(SystemRunner, HttpFetcher::new(), policy);
    let (plan, tools, env) = driver.prepare(&config, settings, base).await?;
    let results = driver.execute(&plan, &tools, env).await?;

    tracing::info!(
        "Build complete: {} console scripts",
        results.console_scripts.len()
    );
    for script in &results.console_scripts {
        println!("{}", script);
    }
    Ok(0)
}
