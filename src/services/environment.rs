//! Recover the environment a batch file leaves behind.
//!
//! A `.bat`/`.cmd` file such as `vcvarsall.bat` only changes the
//! environment of the `cmd.exe` running it. To bring those variables back
//! into the build, the batch file is chained with an `echo` of a marker and
//! `set`, and every `KEY=VALUE` line printed after the marker is parsed.

use super::process::{CommandRunner, Invocation, ProcessError, windows_command_line};
use crate::models::Environment;
use thiserror::Error;

/// Marker echoed between the batch file's own output and `set`.
pub const CAPTURE_MARKER: &str = "Done running command";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Marker line {CAPTURE_MARKER:?} not found in output of {command}")]
    MarkerMissing { command: String },
}

/// The `cmd.exe` argument that runs `command` and dumps the resulting environment.
pub fn capture_command_line<S: AsRef<str>>(command: &[S]) -> String {
    format!(
        "\"{} && echo \"{}\" && set\"",
        windows_command_line(command),
        CAPTURE_MARKER
    )
}

/// Parse `set` output following the marker line.
///
/// Lines that do not split into a non-empty key and a value on the first
/// `=` are skipped and logged; they never fail the capture.
pub fn parse_captured_environment(output: &str) -> Option<Environment> {
    let mut lines = output.lines();
    lines.by_ref().find(|line| line.contains(CAPTURE_MARKER))?;

    let pairs = lines.filter_map(|line| {
        let line = line.trim_end();
        match line.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
            _ => {
                tracing::debug!("Unexpected environment line: {:?}", line);
                None
            }
        }
    });

    Some(pairs.collect())
}

/// Run `command` through `cmd.exe` and return the environment it produced.
///
/// `initial` is the environment the shell starts from. A non-zero exit is fatal.
pub async fn capture_batch_environment<R, S>(
    runner: &R,
    command: &[S],
    initial: &Environment,
) -> Result<Environment, CaptureError>
where
    R: CommandRunner,
    S: AsRef<str>,
{
    let line = capture_command_line(command);
    tracing::info!("Capturing environment from: cmd.exe /s /c {}", line);

    let invocation = Invocation::new("cmd.exe")
        .args(["/s", "/c"])
        .arg(line.as_str())
        .verbatim()
        .env(initial);
    let stdout = runner.check_output(&invocation).await?;

    let stdout = String::from_utf8_lossy(&stdout);
    parse_captured_environment(&stdout).ok_or(CaptureError::MarkerMissing { command: line })
}
