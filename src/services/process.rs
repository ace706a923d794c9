//! Child process invocation with up-front diagnostics.
//!
//! Every toolchain step goes through a [`CommandRunner`]. Before a command
//! runs, the caller location, working directory, argument vector and fully
//! quoted command line are logged so a failing step can be reproduced by
//! hand. A non-zero exit is a [`ProcessError::Failed`] and is never retried.

use crate::models::Environment;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt::Write as _;
use std::panic::Location;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command {command} failed in {cwd} with {status}")]
    Failed {
        command: String,
        cwd: String,
        status: String,
    },
}

/// A fully described child process call.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: Option<Utf8PathBuf>,
    env: Option<Environment>,
    shell: bool,
    verbatim: bool,
    caller: &'static Location<'static>,
}

impl Invocation {
    #[track_caller]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: None,
            shell: false,
            verbatim: false,
            caller: Location::caller(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl AsRef<Utf8Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Run with exactly this environment instead of inheriting the parent's.
    pub fn env(mut self, env: &Environment) -> Self {
        self.env = Some(env.clone());
        self
    }

    /// Run through the platform shell.
    pub fn shell(mut self) -> Self {
        self.shell = true;
        self
    }

    /// Hand the arguments to the program without quoting them.
    ///
    /// Only meaningful on Windows, where `cmd.exe /s /c` parses its own
    /// command line. Elsewhere the arguments are passed as usual.
    pub fn verbatim(mut self) -> Self {
        self.verbatim = true;
        self
    }

    pub fn is_verbatim(&self) -> bool {
        self.verbatim
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Utf8Path> {
        self.cwd.as_deref()
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.env.as_ref()
    }

    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }

    /// The command line with every element POSIX shell quoted.
    pub fn quoted(&self) -> String {
        self.argv().map(posix_quote).collect::<Vec<_>>().join(" ")
    }

    /// Multi-line report logged before the command runs.
    pub fn describe(&self) -> String {
        let mut report = String::from("Calling:\n");
        let _ = writeln!(
            report,
            "    Caller: {}:{}:{}",
            self.caller.file(),
            self.caller.line(),
            self.caller.column()
        );
        let _ = writeln!(report, "    CWD: {:?}", self.cwd.as_ref().map(|c| c.as_str()));
        let _ = writeln!(report, "    As passed: {:?}", self.argv().collect::<Vec<_>>());
        let _ = writeln!(report, "    Full: {}", self.quoted());
        for arg in self.argv() {
            let _ = writeln!(report, "    {:?}", arg);
        }
        report
    }

    fn failure(&self, status: ExitStatus) -> ProcessError {
        ProcessError::Failed {
            command: self.quoted(),
            cwd: self
                .cwd
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| ".".to_string()),
            status: status.to_string(),
        }
    }

    fn command(&self) -> Command {
        let mut command = if self.shell {
            let line = self.argv().collect::<Vec<_>>();
            if cfg!(windows) {
                let mut c = Command::new("cmd");
                c.arg("/C");
                raw_arg(&mut c, &windows_command_line(&line));
                c
            } else {
                let mut c = Command::new("sh");
                c.args(["-c", self.quoted().as_str()]);
                c
            }
        } else {
            let mut c = Command::new(&self.program);
            if self.verbatim {
                for arg in &self.args {
                    raw_arg(&mut c, arg);
                }
            } else {
                c.args(&self.args);
            }
            c
        };

        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        if let Some(env) = &self.env {
            command.env_clear();
            command.envs(env.iter());
        }
        command
    }
}

/// Executes [`Invocation`]s.
///
/// The build driver is generic over this so tests can substitute a recorder.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run to completion, failing on a non-zero exit.
    async fn check_call(&self, invocation: &Invocation) -> Result<(), ProcessError>;

    /// Run to completion capturing stdout, failing on a non-zero exit.
    async fn check_output(&self, invocation: &Invocation) -> Result<Vec<u8>, ProcessError>;

    /// Run to completion and return the exit code whatever it is.
    async fn call(&self, invocation: &Invocation) -> Result<i32, ProcessError>;
}

/// Runs invocations as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn spawn_error(invocation: &Invocation, source: std::io::Error) -> ProcessError {
        ProcessError::Spawn {
            program: invocation.program.clone(),
            source,
        }
    }
}

impl CommandRunner for SystemRunner {
    async fn check_call(&self, invocation: &Invocation) -> Result<(), ProcessError> {
        tracing::info!("{}", invocation.describe());

        let status = invocation
            .command()
            .status()
            .await
            .map_err(|e| Self::spawn_error(invocation, e))?;

        if !status.success() {
            return Err(invocation.failure(status));
        }
        Ok(())
    }

    async fn check_output(&self, invocation: &Invocation) -> Result<Vec<u8>, ProcessError> {
        tracing::debug!("{}", invocation.describe());

        let output = invocation
            .command()
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| Self::spawn_error(invocation, e))?;

        if !output.status.success() {
            return Err(invocation.failure(output.status));
        }
        Ok(output.stdout)
    }

    async fn call(&self, invocation: &Invocation) -> Result<i32, ProcessError> {
        tracing::debug!("{}", invocation.describe());

        let status = invocation
            .command()
            .status()
            .await
            .map_err(|e| Self::spawn_error(invocation, e))?;

        // Killed by a signal: report a generic failure code.
        Ok(status.code().unwrap_or(1))
    }
}

/// Append `text` to the command line without further quoting.
///
/// `cmd.exe` does its own parsing, so arguments meant for it must not be
/// re-quoted by the standard library.
pub(crate) fn raw_arg(command: &mut Command, text: &str) {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        command.as_std_mut().raw_arg(text);
    }
    #[cfg(not(windows))]
    {
        command.arg(text);
    }
}

/// Quote `word` for a POSIX shell, leaving safe words untouched.
pub fn posix_quote(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }

    let safe = word
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\"'\"'"))
    }
}

/// Join arguments with the Microsoft C runtime quoting rules.
pub fn windows_command_line<S: AsRef<str>>(args: &[S]) -> String {
    let mut result = String::new();

    for arg in args {
        let arg = arg.as_ref();
        let mut backslashes = 0usize;

        if !result.is_empty() {
            result.push(' ');
        }

        let needs_quotes = arg.is_empty() || arg.contains(' ') || arg.contains('\t');
        if needs_quotes {
            result.push('"');
        }

        for c in arg.chars() {
            match c {
                '\\' => backslashes += 1,
                '"' => {
                    result.push_str(&"\\".repeat(backslashes * 2));
                    backslashes = 0;
                    result.push_str("\\\"");
                }
                other => {
                    result.push_str(&"\\".repeat(backslashes));
                    backslashes = 0;
                    result.push(other);
                }
            }
        }

        result.push_str(&"\\".repeat(backslashes));
        if needs_quotes {
            result.push_str(&"\\".repeat(backslashes));
            result.push('"');
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posix_quote() {
        assert_eq!(posix_quote("nmake"), "nmake");
        assert_eq!(posix_quote(""), "''");
        assert_eq!(posix_quote("C:/Program Files"), "'C:/Program Files'");
        assert_eq!(posix_quote("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn test_windows_command_line() {
        assert_eq!(
            windows_command_line(&["C:\\Program Files\\vcvarsall.bat", "x64"]),
            "\"C:\\Program Files\\vcvarsall.bat\" x64"
        );
        assert_eq!(windows_command_line(&["a\"b"]), "a\\\"b");
        assert_eq!(windows_command_line(&["dir with\\"]), "\"dir with\\\\\"");
        assert_eq!(windows_command_line(&[""]), "\"\"");
    }

    #[test]
    fn test_describe_reports_context() {
        let invocation = Invocation::new("nmake")
            .arg("install")
            .cwd("C:/build/src/sip-4.19.8");

        let report = invocation.describe();
        assert!(report.contains("Caller: "));
        assert!(report.contains("process.rs"));
        assert!(report.contains("CWD: Some(\"C:/build/src/sip-4.19.8\")"));
        assert!(report.contains("As passed: [\"nmake\", \"install\"]"));
        assert!(report.contains("Full: nmake install"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_check_call_failure_is_reported() {
        let invocation = Invocation::new("sh").args(["-c", "exit 3"]);
        let err = SystemRunner.check_call(&invocation).await.unwrap_err();
        match err {
            ProcessError::Failed { command, .. } => assert_eq!(command, "sh -c 'exit 3'"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_verbatim_arguments_reach_the_program_whole() {
        let invocation = Invocation::new("sh")
            .args(["-c", "echo \"a  b\" && echo c"])
            .verbatim();
        assert!(invocation.is_verbatim());

        let stdout = SystemRunner.check_output(&invocation).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&stdout), "a  b\nc\n");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_call_returns_exit_code() {
        let invocation = Invocation::new("sh").args(["-c", "exit 7"]);
        assert_eq!(SystemRunner.call(&invocation).await.unwrap(), 7);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_check_output_uses_given_environment() {
        let env: Environment = [
            ("PATH".to_string(), std::env::var("PATH").unwrap_or_default()),
            ("MARKER".to_string(), "from-build".to_string()),
        ]
        .into_iter()
        .collect();

        let invocation = Invocation::new("sh")
            .args(["-c", "echo $MARKER"])
            .env(&env);
        let stdout = SystemRunner.check_output(&invocation).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&stdout).trim(), "from-build");
    }

    #[test]
    fn test_spawn_error_for_missing_program() {
        let invocation = Invocation::new("definitely-not-a-real-program-pyqt-tools");
        let err = tokio_test::block_on(SystemRunner.check_call(&invocation)).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
