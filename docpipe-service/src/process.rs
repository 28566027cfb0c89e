//! External process execution.
//!
//! Commands are spawned from an argument vector, never through a shell, so
//! paths containing spaces or shell metacharacters reach the tool untouched.
//! No timeout is imposed here; callers that need bounded latency wrap the
//! returned future themselves.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ExternalToolError;

/// A program plus its discrete arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name for logs and errors
    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Arguments as lossy UTF-8, mostly useful for assertions and logs
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Value of the first `prefix…` style argument, with the prefix removed
    pub fn arg_value(&self, prefix: &str) -> Option<String> {
        self.args_lossy()
            .into_iter()
            .find_map(|a| a.strip_prefix(prefix).map(str::to_string))
    }

    /// Argument following the first occurrence of `flag`
    pub fn arg_after(&self, flag: &str) -> Option<String> {
        let args = self.args_lossy();
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.program.display())?;
        for arg in &self.args {
            write!(f, " \"{}\"", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured output of a successful process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes external commands
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion. Non-zero exit is an error carrying stderr verbatim.
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ExternalToolError>;
}

/// Runner that spawns real child processes on the tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ExternalToolError> {
        let program = invocation.program_name();
        debug!(command = %invocation, "Spawning external tool");
        let started = Instant::now();

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExternalToolError::NotFound {
                        program: program.clone(),
                    }
                } else {
                    ExternalToolError::Spawn {
                        program: program.clone(),
                        source: e,
                    }
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if !output.status.success() {
            debug!(
                program = %program,
                status = ?output.status.code(),
                elapsed_ms,
                stderr = %stderr.trim(),
                "External tool failed"
            );
            return Err(ExternalToolError::Failed {
                program,
                status: output.status.code(),
                stderr,
            });
        }

        info!(program = %program, elapsed_ms, "External tool finished");
        Ok(ProcessOutput { stdout, stderr })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_keeps_arguments_intact() {
        let inv = Invocation::new("qpdf")
            .arg("--password=p w\"d")
            .args(["--decrypt", "/tmp/my file.pdf", "/tmp/out; rm -rf.pdf"]);

        assert_eq!(
            inv.args_lossy(),
            vec![
                "--password=p w\"d",
                "--decrypt",
                "/tmp/my file.pdf",
                "/tmp/out; rm -rf.pdf"
            ]
        );
        assert_eq!(inv.arg_value("--password="), Some("p w\"d".to_string()));
        assert_eq!(inv.arg_after("--decrypt"), Some("/tmp/my file.pdf".to_string()));
        assert_eq!(inv.arg_after("--missing"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_runner_captures_output() {
        let inv = Invocation::new("sh").args(["-c", "echo hello; echo oops >&2"]);
        let output = TokioProcessRunner.run(&inv).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_runner_reports_failure_with_stderr() {
        let inv = Invocation::new("sh").args(["-c", "echo 'invalid password' >&2; exit 2"]);
        let err = TokioProcessRunner.run(&inv).await.unwrap_err();
        assert_eq!(err.status(), Some(2));
        assert_eq!(err.stderr().map(str::trim), Some("invalid password"));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_tokio_runner_reports_missing_binary() {
        let inv = Invocation::new("docpipe-definitely-not-installed-tool");
        let err = TokioProcessRunner.run(&inv).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
