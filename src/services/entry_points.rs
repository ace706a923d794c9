//! Generated console-script stubs, one per bundled Qt application.
//!
//! Each stub loads `.env` and runs `Qt/bin/<name>.exe` with the caller's
//! arguments, returning its exit code. [`crate::services::launcher::run_application`]
//! is the same behavior for the native launcher.

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;

/// Python package that owns the destination tree.
pub const PACKAGE: &str = "pyqt5_tools";

pub const ENTRY_POINTS_FILE: &str = "entrypoints.py";

/// Outcome of a build: the console scripts to register.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildResults {
    pub console_scripts: Vec<String>,
}

impl BuildResults {
    pub fn from_applications<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            console_scripts: names.iter().map(|n| console_script(n.as_ref())).collect(),
        }
    }
}

/// `name = pyqt5_tools.entrypoints:name`
pub fn console_script(name: &str) -> String {
    format!("{name} = {PACKAGE}.entrypoints:{name}")
}

/// The newline convention already used by `content`.
///
/// Mixed or absent line endings fall back to `\n`.
pub fn detect_newline(content: &str) -> &'static str {
    let crlf = content.matches("\r\n").count();
    let lf = content.matches('\n').count() - crlf;
    let cr = content.matches('\r').count() - crlf;

    match (crlf > 0, lf > 0, cr > 0) {
        (true, false, false) => "\r\n",
        (false, false, true) => "\r",
        _ => "\n",
    }
}

/// Stub function for application `name`.
pub fn render_entry_point(name: &str, newline: &str) -> String {
    let lines = [
        format!("def {name}():"),
        "    load_dotenv()".to_string(),
        format!("    return subprocess.call([str(here/'Qt'/'bin'/'{name}.exe'), *sys.argv[1:]])"),
        String::new(),
        String::new(),
        String::new(),
    ];
    lines.join(newline)
}

/// Append stubs for `names` to the entry point module, creating it if needed.
pub fn append_entry_points<S: AsRef<str>>(module: &Utf8Path, names: &[S]) -> Result<()> {
    let existing = if module.exists() {
        fs::read_to_string(module).with_context(|| format!("Failed to read {}", module))?
    } else {
        String::new()
    };
    let newline = detect_newline(&existing);

    let mut content = existing;
    for name in names {
        content.push_str(&render_entry_point(name.as_ref(), newline));
    }

    fs::write(module, content).with_context(|| format!("Failed to write {}", module))?;
    tracing::info!("Wrote {} entry points to {}", names.len(), module);
    Ok(())
}
