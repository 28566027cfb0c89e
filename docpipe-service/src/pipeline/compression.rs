//! PDF compression through the rasterizer.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tracing::{info, warn};

use crate::artifacts::ensure_dir;
use crate::error::{ExternalToolError, PipelineError, PipelineResult};
use crate::job::{JobOutput, file_name_of};
use crate::process::Invocation;
use crate::tools::{Platform, Tool};

use super::{DocumentPipeline, check_source, clear_stale, ensure_distinct};

/// Command retried when the resolved rasterizer cannot be executed on Windows
const BARE_RASTERIZER: &str = "gs";

/// Rasterizer quality presets (`-dPDFSETTINGS`)
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    EnumString,
    EnumIter,
    Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Smallest output, 72 dpi images
    Screen,
    /// Medium quality, 150 dpi images
    #[default]
    Ebook,
    /// 300 dpi images
    Printer,
    /// Colour-preserving 300 dpi
    Prepress,
    /// The rasterizer's general-purpose preset
    Default,
}

impl CompressionLevel {
    /// Parse a caller-supplied level; a leading `/` is accepted.
    pub fn parse(level: &str) -> PipelineResult<Self> {
        let trimmed = level.trim();
        Self::from_str(trimmed.strip_prefix('/').unwrap_or(trimmed)).map_err(|_| {
            PipelineError::invalid_input(format!("unknown compression level: {:?}", level))
        })
    }

    fn settings_flag(self) -> String {
        format!("-dPDFSETTINGS=/{}", self)
    }
}

pub(crate) fn compression_invocation(
    program: &Path,
    level: CompressionLevel,
    input: &Path,
    output: &Path,
) -> Invocation {
    let mut output_flag = std::ffi::OsString::from("-sOutputFile=");
    output_flag.push(output);

    Invocation::new(program)
        .args([
            "-sDEVICE=pdfwrite",
            "-dCompatibilityLevel=1.4",
        ])
        .arg(level.settings_flag())
        .args(["-dNOPAUSE", "-dQUIET", "-dBATCH"])
        .arg(output_flag)
        .arg(input)
}

fn compression_error(e: &ExternalToolError) -> PipelineError {
    PipelineError::Compression {
        message: e.to_string(),
        stderr: e.stderr().map(str::to_string),
    }
}

impl DocumentPipeline {
    /// Compress a PDF to `<output_dir>/compressed_<input file name>`.
    ///
    /// On Windows a "not found" failure of the resolved command is retried
    /// once with the bare `gs` name. A missing rasterizer is reported as
    /// [`PipelineError::ToolNotFound`], never as a compression failure.
    pub async fn compress(
        &self,
        input_path: &Path,
        output_dir: &Path,
        level: &str,
    ) -> PipelineResult<JobOutput> {
        check_source(input_path)?;
        let level = CompressionLevel::parse(level)?;
        ensure_dir(output_dir)?;

        let output = output_dir.join(format!("compressed_{}", file_name_of(input_path)));
        ensure_distinct(&output, input_path)?;
        clear_stale(&output)?;

        let rasterizer = self.locator.locate(Tool::Rasterizer);
        let invocation = compression_invocation(&rasterizer.program, level, input_path, &output);

        info!(input = %input_path.display(), level = %level, "Compressing PDF");
        match self.runner.run(&invocation).await {
            Ok(_) => {}
            Err(e)
                if e.is_not_found()
                    && self.locator.platform() == Platform::Windows
                    && rasterizer.program.as_path() != Path::new(BARE_RASTERIZER) =>
            {
                warn!(
                    program = %rasterizer.program.display(),
                    "Rasterizer not found, retrying with bare command"
                );
                let retry = compression_invocation(
                    &PathBuf::from(BARE_RASTERIZER),
                    level,
                    input_path,
                    &output,
                );
                match self.runner.run(&retry).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {
                        return Err(PipelineError::ToolNotFound {
                            tool: Tool::Rasterizer,
                        });
                    }
                    Err(e) => return Err(compression_error(&e)),
                }
            }
            Err(e) if e.is_not_found() => {
                return Err(PipelineError::ToolNotFound {
                    tool: Tool::Rasterizer,
                });
            }
            Err(e) => {
                warn!(error = %e, "Compression failed");
                return Err(compression_error(&e));
            }
        }

        if !output.is_file() {
            return Err(PipelineError::Compression {
                message: format!("Output file not generated: {}", output.display()),
                stderr: None,
            });
        }

        info!(output = %output.display(), "Compression finished");
        Ok(JobOutput::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{harness, harness_on};
    use crate::process::ProcessOutput;
    use crate::process::testing::{ScriptedRunner, failed, not_found};
    use strum::IntoEnumIterator;

    /// Plays the rasterizer when invoked as `program`
    fn rasterizer_as(program: &'static str) -> ScriptedRunner {
        ScriptedRunner::new(move |inv| {
            if inv.program.as_path() != Path::new(program) {
                return Err(not_found(inv));
            }
            let output = inv.arg_value("-sOutputFile=").unwrap();
            std::fs::write(output, b"%PDF-1.4 small").unwrap();
            Ok(ProcessOutput::default())
        })
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(CompressionLevel::parse("ebook").unwrap(), CompressionLevel::Ebook);
        assert_eq!(CompressionLevel::parse("/screen").unwrap(), CompressionLevel::Screen);
        assert_eq!(CompressionLevel::parse("Printer").unwrap(), CompressionLevel::Printer);
        assert_eq!(
            CompressionLevel::parse("extreme").unwrap_err().code(),
            "invalid_input"
        );
        for level in CompressionLevel::iter() {
            assert_eq!(CompressionLevel::parse(&level.to_string()).unwrap(), level);
        }
    }

    #[test]
    fn test_invocation_flags() {
        let inv = compression_invocation(
            Path::new("gs"),
            CompressionLevel::Screen,
            Path::new("/tmp/in file.pdf"),
            Path::new("/tmp/compressed_in file.pdf"),
        );
        assert_eq!(
            inv.args_lossy(),
            vec![
                "-sDEVICE=pdfwrite",
                "-dCompatibilityLevel=1.4",
                "-dPDFSETTINGS=/screen",
                "-dNOPAUSE",
                "-dQUIET",
                "-dBATCH",
                "-sOutputFile=/tmp/compressed_in file.pdf",
                "/tmp/in file.pdf",
            ]
        );
    }

    #[tokio::test]
    async fn test_compresses_to_prefixed_name() {
        let h = harness(rasterizer_as("gs"));
        let input = h.write("report.pdf", b"%PDF-1.4 big");

        let output = h.pipeline.compress(&input, h.staging(), "ebook").await.unwrap();

        assert_eq!(output.filename, "compressed_report.pdf");
        assert!(output.output_path.exists());
        assert_eq!(std::fs::read(&input).unwrap(), b"%PDF-1.4 big");
    }

    #[tokio::test]
    async fn test_windows_retries_with_bare_name() {
        let h = harness_on(Platform::Windows, rasterizer_as("gs"));
        let input = h.write("report.pdf", b"%PDF");

        let output = h.pipeline.compress(&input, h.staging(), "screen").await.unwrap();

        assert!(output.output_path.exists());
        assert_eq!(h.runner.calls_to("gswin64c"), 1);
        assert_eq!(h.runner.calls_to("gs"), 1);
    }

    #[tokio::test]
    async fn test_missing_rasterizer_is_tool_not_found() {
        let h = harness_on(Platform::Windows, rasterizer_as("nothing"));
        let input = h.write("report.pdf", b"%PDF");

        let err = h.pipeline.compress(&input, h.staging(), "screen").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ToolNotFound {
                tool: Tool::Rasterizer
            }
        ));
        assert_eq!(h.runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_bad_input_is_not_retried() {
        let h = harness_on(
            Platform::Windows,
            ScriptedRunner::new(|inv| Err(failed(inv, "Error: /syntaxerror in pdfmark"))),
        );
        let input = h.write("report.pdf", b"garbage");

        let err = h.pipeline.compress(&input, h.staging(), "ebook").await.unwrap_err();

        assert_eq!(err.code(), "compression_error");
        assert_eq!(err.stderr(), Some("Error: /syntaxerror in pdfmark"));
        assert_eq!(h.runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_posix_does_not_retry() {
        let h = harness(ScriptedRunner::new(|inv| Err(not_found(inv))));
        let input = h.write("report.pdf", b"%PDF");

        let err = h.pipeline.compress(&input, h.staging(), "ebook").await.unwrap_err();

        assert_eq!(err.code(), "tool_not_found");
        assert_eq!(h.runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_exit_without_output_fails() {
        let h = harness(ScriptedRunner::new(|_| Ok(ProcessOutput::default())));
        let input = h.write("report.pdf", b"%PDF");

        let err = h.pipeline.compress(&input, h.staging(), "ebook").await.unwrap_err();
        assert_eq!(err.code(), "compression_error");
    }
}
