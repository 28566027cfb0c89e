//! Password protection and removal.
//!
//! The primary encryption tool is tried first. Any failure other than a
//! recognised wrong-password message falls through to the secondary tool
//! exactly once.

use std::path::Path;

use tracing::{info, warn};

use crate::artifacts::ensure_dir;
use crate::error::{ExternalToolError, PipelineError, PipelineResult};
use crate::job::{JobOutput, file_name_of};
use crate::process::Invocation;
use crate::tools::Tool;

use super::{DocumentPipeline, check_source, clear_stale, ensure_distinct};

/// AES key length requested from the primary tool
const PRIMARY_KEY_LENGTH: &str = "256";

/// Exit status the primary tool uses for "succeeded with warnings"
const PRIMARY_WARNING_STATUS: i32 = 3;

/// True when the primary tool's stderr reports a bad password.
///
/// This matches the tool's English phrasing and is best-effort; callers get
/// the raw stderr on every error for their own checks.
pub fn is_wrong_password(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("invalid password") || stderr.contains("incorrect password")
}

/// The secondary tool is less specific and only mentions the password
fn fallback_reports_password(stderr: &str) -> bool {
    stderr.to_lowercase().contains("password")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Protect,
    Unlock,
}

impl Operation {
    fn output_prefix(self) -> &'static str {
        match self {
            Operation::Protect => "protected_",
            Operation::Unlock => "unlocked_",
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Operation::Protect => "protect",
            Operation::Unlock => "unlock",
        }
    }

    fn primary(self, program: &Path, password: &str, input: &Path, output: &Path) -> Invocation {
        match self {
            Operation::Protect => Invocation::new(program)
                .args(["--encrypt", password, password, PRIMARY_KEY_LENGTH, "--"])
                .arg(input)
                .arg(output),
            Operation::Unlock => Invocation::new(program)
                .arg(format!("--password={}", password))
                .arg("--decrypt")
                .arg(input)
                .arg(output),
        }
    }

    fn fallback(self, program: &Path, password: &str, input: &Path, output: &Path) -> Invocation {
        match self {
            Operation::Protect => Invocation::new(program)
                .arg(input)
                .arg("output")
                .arg(output)
                .args(["user_pw", password, "owner_pw", password, "encrypt_128bit"]),
            Operation::Unlock => Invocation::new(program)
                .arg(input)
                .args(["input_pw", password])
                .arg("output")
                .arg(output),
        }
    }
}

/// Why one tool attempt did not yield an output file
enum AttemptFailure {
    Tool(ExternalToolError),
    NoOutput,
}

impl AttemptFailure {
    fn stderr(&self) -> Option<&str> {
        match self {
            AttemptFailure::Tool(e) => e.stderr(),
            AttemptFailure::NoOutput => None,
        }
    }

    fn is_not_found(&self) -> bool {
        matches!(self, AttemptFailure::Tool(e) if e.is_not_found())
    }

    fn describe(&self) -> String {
        match self {
            AttemptFailure::Tool(e) => e.to_string(),
            AttemptFailure::NoOutput => "no output file was produced".to_string(),
        }
    }
}

impl DocumentPipeline {
    /// Encrypt with the same user and owner password, writing
    /// `<output_dir>/protected_<input file name>`.
    pub async fn protect(
        &self,
        input_path: &Path,
        output_dir: &Path,
        password: &str,
    ) -> PipelineResult<JobOutput> {
        if password.is_empty() {
            return Err(PipelineError::invalid_input("password must not be empty"));
        }
        self.run_encryption(Operation::Protect, input_path, output_dir, password)
            .await
    }

    /// Remove password protection, writing `<output_dir>/unlocked_<input file name>`.
    pub async fn unlock(
        &self,
        input_path: &Path,
        output_dir: &Path,
        password: &str,
    ) -> PipelineResult<JobOutput> {
        self.run_encryption(Operation::Unlock, input_path, output_dir, password)
            .await
    }

    async fn run_encryption(
        &self,
        operation: Operation,
        input_path: &Path,
        output_dir: &Path,
        password: &str,
    ) -> PipelineResult<JobOutput> {
        check_source(input_path)?;
        ensure_dir(output_dir)?;

        let output = output_dir.join(format!(
            "{}{}",
            operation.output_prefix(),
            file_name_of(input_path)
        ));
        ensure_distinct(&output, input_path)?;
        clear_stale(&output)?;

        let primary = self.locator.locate(Tool::EncryptionPrimary);
        let invocation = operation.primary(&primary.program, password, input_path, &output);
        let primary_failure = match self.attempt(&invocation, &output).await {
            Ok(()) => {
                info!(operation = operation.verb(), output = %output.display(), "Encryption step finished");
                return Ok(JobOutput::new(output));
            }
            Err(failure) => failure,
        };

        if let Some(stderr) = primary_failure.stderr()
            && is_wrong_password(stderr)
        {
            info!(operation = operation.verb(), "Primary tool rejected the password");
            return Err(PipelineError::WrongPassword {
                stderr: stderr.to_string(),
            });
        }

        warn!(
            operation = operation.verb(),
            error = %primary_failure.describe(),
            "Primary encryption tool failed, trying fallback"
        );
        clear_stale(&output)?;

        let fallback = self.locator.locate(Tool::EncryptionFallback);
        let invocation = operation.fallback(&fallback.program, password, input_path, &output);
        let fallback_failure = match self.attempt(&invocation, &output).await {
            Ok(()) => {
                info!(operation = operation.verb(), output = %output.display(), "Fallback encryption tool finished");
                return Ok(JobOutput::new(output));
            }
            Err(failure) => failure,
        };

        if operation == Operation::Unlock
            && let Some(stderr) = fallback_failure.stderr()
            && fallback_reports_password(stderr)
        {
            return Err(PipelineError::WrongPassword {
                stderr: stderr.to_string(),
            });
        }

        if primary_failure.is_not_found() && fallback_failure.is_not_found() {
            return Err(PipelineError::ToolNotFound {
                tool: Tool::EncryptionPrimary,
            });
        }

        let stderr = fallback_failure
            .stderr()
            .or_else(|| primary_failure.stderr())
            .map(str::to_string);
        Err(PipelineError::Encryption {
            unlock: operation == Operation::Unlock,
            message: format!(
                "could not {} PDF: {}; fallback: {}",
                operation.verb(),
                primary_failure.describe(),
                fallback_failure.describe()
            ),
            stderr,
        })
    }

    /// Run one tool and require its output file to exist
    async fn attempt(&self, invocation: &Invocation, output: &Path) -> Result<(), AttemptFailure> {
        match self.runner.run(invocation).await {
            Ok(_) => {}
            Err(e) if e.status() == Some(PRIMARY_WARNING_STATUS) && output.is_file() => {
                warn!(
                    program = %invocation.program_name(),
                    stderr = %e.stderr().unwrap_or_default().trim(),
                    "Tool finished with warnings"
                );
            }
            Err(e) => return Err(AttemptFailure::Tool(e)),
        }

        if output.is_file() {
            Ok(())
        } else {
            Err(AttemptFailure::NoOutput)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::I18n;
    use crate::pipeline::test_support::harness;
    use crate::process::ProcessOutput;
    use crate::process::testing::{ScriptedRunner, failed, not_found};

    /// Writes the output (last argument for qpdf, after `output` for pdftk)
    fn write_output(inv: &Invocation) {
        let path = inv
            .arg_after("output")
            .unwrap_or_else(|| inv.args_lossy().last().unwrap().clone());
        std::fs::write(path, b"%PDF-1.7 encrypted").unwrap();
    }

    #[test]
    fn test_wrong_password_detection() {
        assert!(is_wrong_password("qpdf: in.pdf: invalid password"));
        assert!(is_wrong_password("Incorrect Password supplied"));
        assert!(!is_wrong_password("qpdf: in.pdf: file is damaged"));
    }

    #[test]
    fn test_invocations() {
        let protect = Operation::Protect.primary(
            Path::new("qpdf"),
            "s3cret",
            Path::new("/t/in.pdf"),
            Path::new("/t/protected_in.pdf"),
        );
        assert_eq!(
            protect.args_lossy(),
            vec!["--encrypt", "s3cret", "s3cret", "256", "--", "/t/in.pdf", "/t/protected_in.pdf"]
        );

        let unlock = Operation::Unlock.fallback(
            Path::new("pdftk"),
            "s3cret",
            Path::new("/t/in.pdf"),
            Path::new("/t/unlocked_in.pdf"),
        );
        assert_eq!(
            unlock.args_lossy(),
            vec!["/t/in.pdf", "input_pw", "s3cret", "output", "/t/unlocked_in.pdf"]
        );

        let protect = Operation::Protect.fallback(
            Path::new("pdftk"),
            "pw",
            Path::new("/t/in.pdf"),
            Path::new("/t/out.pdf"),
        );
        assert_eq!(
            protect.args_lossy(),
            vec!["/t/in.pdf", "output", "/t/out.pdf", "user_pw", "pw", "owner_pw", "pw", "encrypt_128bit"]
        );
    }

    #[tokio::test]
    async fn test_protect_with_primary() {
        let h = harness(ScriptedRunner::new(|inv| {
            write_output(inv);
            Ok(ProcessOutput::default())
        }));
        let input = h.write("contract.pdf", b"%PDF");

        let output = h.pipeline.protect(&input, h.staging(), "pw").await.unwrap();

        assert_eq!(output.filename, "protected_contract.pdf");
        assert_eq!(h.runner.calls_to("qpdf"), 1);
        assert_eq!(h.runner.calls_to("pdftk"), 0);
    }

    #[tokio::test]
    async fn test_protect_falls_back_when_primary_missing() {
        let h = harness(ScriptedRunner::new(|inv| {
            if inv.program.as_path() == Path::new("qpdf") {
                return Err(not_found(inv));
            }
            write_output(inv);
            Ok(ProcessOutput::default())
        }));
        let input = h.write("contract.pdf", b"%PDF");

        let output = h.pipeline.protect(&input, h.staging(), "pw").await.unwrap();

        assert!(output.output_path.exists());
        assert_eq!(h.runner.calls_to("pdftk"), 1);
    }

    #[tokio::test]
    async fn test_unlock_wrong_password_skips_fallback() {
        let h = harness(ScriptedRunner::new(|inv| {
            Err(failed(inv, "qpdf: contract.pdf: invalid password"))
        }));
        let input = h.write("contract.pdf", b"%PDF");

        let err = h.pipeline.unlock(&input, h.staging(), "nope").await.unwrap_err();

        assert!(matches!(err, PipelineError::WrongPassword { .. }));
        assert_eq!(err.stderr(), Some("qpdf: contract.pdf: invalid password"));
        assert_eq!(h.runner.calls_to("qpdf"), 1);
        assert_eq!(h.runner.calls_to("pdftk"), 0);
    }

    #[tokio::test]
    async fn test_unlock_fallback_password_message() {
        let h = harness(ScriptedRunner::new(|inv| {
            if inv.program.as_path() == Path::new("qpdf") {
                Err(not_found(inv))
            } else {
                Err(failed(inv, "Error: Failed to open PDF file: OWNER PASSWORD REQUIRED"))
            }
        }));
        let input = h.write("contract.pdf", b"%PDF");

        let err = h.pipeline.unlock(&input, h.staging(), "nope").await.unwrap_err();
        assert_eq!(err.code(), "wrong_password");
    }

    #[tokio::test]
    async fn test_both_tools_missing() {
        let h = harness(ScriptedRunner::new(|inv| Err(not_found(inv))));
        let input = h.write("contract.pdf", b"%PDF");

        let err = h.pipeline.protect(&input, h.staging(), "pw").await.unwrap_err();
        assert_eq!(err.code(), "tool_not_found");
    }

    #[tokio::test]
    async fn test_both_tools_fail() {
        let h = harness(ScriptedRunner::new(|inv| {
            Err(failed(inv, "file is damaged"))
        }));
        let input = h.write("contract.pdf", b"%PDF");

        let err = h.pipeline.protect(&input, h.staging(), "pw").await.unwrap_err();

        assert_eq!(err.code(), "encryption_error");
        assert_eq!(err.stderr(), Some("file is damaged"));
        assert!(!h.staging().join("protected_contract.pdf").exists());
    }

    #[tokio::test]
    async fn test_damaged_file_message_on_unlock() {
        let h = harness(ScriptedRunner::new(|inv| {
            Err(failed(inv, "qpdf: contract.pdf: file is damaged"))
        }));
        let input = h.write("contract.pdf", b"%PDF");

        let err = h.pipeline.unlock(&input, h.staging(), "pw").await.unwrap_err();

        assert_eq!(err.code(), "encryption_error");
        assert_eq!(h.runner.calls_to("pdftk"), 1);
        assert_eq!(
            err.user_message(&I18n::new(), "en"),
            "Failed to unlock PDF: qpdf: contract.pdf: file is damaged"
        );
    }

    #[tokio::test]
    async fn test_warning_exit_with_output_succeeds() {
        let h = harness(ScriptedRunner::new(|inv| {
            write_output(inv);
            Err(ExternalToolError::Failed {
                program: inv.program_name(),
                status: Some(3),
                stderr: "qpdf: operation succeeded with warnings".to_string(),
            })
        }));
        let input = h.write("contract.pdf", b"%PDF");

        let output = h.pipeline.unlock(&input, h.staging(), "pw").await.unwrap();

        assert!(output.output_path.exists());
        assert_eq!(h.runner.calls_to("pdftk"), 0);
    }

    #[tokio::test]
    async fn test_zero_exit_without_output_falls_back() {
        let h = harness(ScriptedRunner::new(|inv| {
            if inv.program.as_path() == Path::new("pdftk") {
                write_output(inv);
            }
            Ok(ProcessOutput::default())
        }));
        let input = h.write("contract.pdf", b"%PDF");

        let output = h.pipeline.unlock(&input, h.staging(), "pw").await.unwrap();

        assert!(output.output_path.exists());
        assert_eq!(h.runner.calls_to("pdftk"), 1);
    }

    #[tokio::test]
    async fn test_empty_password_rejected_for_protect() {
        let h = harness(ScriptedRunner::failing());
        let input = h.write("contract.pdf", b"%PDF");

        let err = h.pipeline.protect(&input, h.staging(), "").await.unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert!(h.runner.calls().is_empty());
    }
}
