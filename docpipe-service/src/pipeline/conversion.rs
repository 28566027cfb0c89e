//! Conversion through the headless document converter.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifacts::ensure_dir;
use crate::error::{PipelineError, PipelineResult};
use crate::job::{JobOutput, extension_of, stem_of};
use crate::process::Invocation;
use crate::tools::Tool;

use super::{DocumentPipeline, check_source, clear_stale, ensure_distinct};

/// Editable formats that need the PDF import filter when the source is a PDF
const PDF_IMPORT_TARGETS: &[&str] = &["docx", "rtf", "txt", "odt"];

/// `file://` URL for a local path, as the converter expects for its profile
pub(crate) fn file_url(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let encoded = raw
        .split('/')
        .map(|segment| {
            // Keep Windows drive letters (`C:`) literal
            if segment.len() == 2 && segment.ends_with(':') {
                segment.to_string()
            } else {
                urlencoding::encode(segment).into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/");

    if encoded.starts_with('/') {
        format!("file://{}", encoded)
    } else {
        format!("file:///{}", encoded)
    }
}

/// Value for `--convert-to`, adding export filters for raster targets
fn convert_to_arg(target: &str) -> String {
    match target {
        "jpg" | "png" => format!("{target}:draw_{target}_Export"),
        _ => target.to_string(),
    }
}

pub(crate) fn conversion_invocation(
    program: &Path,
    profile_dir: &Path,
    input: &Path,
    output_dir: &Path,
    target: &str,
) -> Invocation {
    let mut invocation = Invocation::new(program)
        .arg(format!("-env:UserInstallation={}", file_url(profile_dir)))
        .arg("--headless");

    if extension_of(input).as_deref() == Some("pdf") && PDF_IMPORT_TARGETS.contains(&target) {
        invocation = invocation.arg("--infilter=writer_pdf_import");
    }

    invocation
        .arg("--convert-to")
        .arg(convert_to_arg(target))
        .arg("--outdir")
        .arg(output_dir)
        .arg(input)
}

/// Rename whatever the converter produced for `base` to the expected name.
///
/// The converter may append page suffixes (`report-1.png`) or vary the case of
/// the extension. The first matching entry in name order wins; the source
/// itself is never picked.
pub(crate) fn reconcile_output(
    output_dir: &Path,
    base: &str,
    target: &str,
    source: &Path,
    expected: &Path,
) -> PipelineResult<Option<PathBuf>> {
    let pattern = Regex::new(&format!(
        "(?i)^{}.*\\.{}$",
        regex::escape(base),
        regex::escape(target)
    ))
    .map_err(|e| PipelineError::Conversion {
        message: format!("invalid output pattern: {}", e),
        stderr: None,
    })?;

    let entries = std::fs::read_dir(output_dir)
        .map_err(|e| PipelineError::io(format!("reading {}", output_dir.display()), e))?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| pattern.is_match(&e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .filter(|p| p.as_path() != source)
        .collect();
    candidates.sort();

    let Some(found) = candidates.into_iter().next() else {
        return Ok(None);
    };

    if found != expected {
        std::fs::rename(&found, expected).map_err(|e| {
            PipelineError::io(
                format!("renaming {} to {}", found.display(), expected.display()),
                e,
            )
        })?;
        debug!(from = %found.display(), to = %expected.display(), "Reconciled converter output");
    }
    Ok(Some(expected.to_path_buf()))
}

fn normalize_target(target_format: &str) -> PipelineResult<String> {
    let target = target_format
        .trim()
        .trim_start_matches('.')
        .to_ascii_lowercase();
    if target.is_empty() || !target.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(PipelineError::invalid_input(format!(
            "unsupported target format: {:?}",
            target_format
        )));
    }
    Ok(target)
}

impl DocumentPipeline {
    /// Convert `input_path` to `target_format`, writing
    /// `<output_dir>/<input base>.<target>`.
    ///
    /// Each call uses a private converter profile directory, scheduled for
    /// deletion whatever the outcome. The output file existing afterwards is
    /// the only proof of success.
    pub async fn convert(
        &self,
        input_path: &Path,
        output_dir: &Path,
        target_format: &str,
    ) -> PipelineResult<JobOutput> {
        check_source(input_path)?;
        let target = normalize_target(target_format)?;
        ensure_dir(output_dir)?;

        let base = stem_of(input_path);
        let expected = output_dir.join(format!("{}.{}", base, target));
        ensure_distinct(&expected, input_path)?;
        clear_stale(&expected)?;

        let profile_dir = output_dir.join(format!("lo_profile_{}", Uuid::new_v4().simple()));
        let converter = self.locator.locate(Tool::DocumentConverter);
        let invocation =
            conversion_invocation(&converter.program, &profile_dir, input_path, output_dir, &target);

        info!(
            input = %input_path.display(),
            target = %target,
            profile = %profile_dir.display(),
            "Starting conversion"
        );
        let result = self.runner.run(&invocation).await;
        self.artifacts
            .schedule_cleanup(&profile_dir, self.config.staging.profile_ttl());

        let output = match result {
            Ok(output) => output,
            Err(e) if e.is_not_found() => {
                warn!(program = %converter.program.display(), "Document converter not found");
                return Err(PipelineError::ToolNotFound {
                    tool: Tool::DocumentConverter,
                });
            }
            Err(e) => {
                warn!(error = %e, "Conversion failed");
                return Err(PipelineError::Conversion {
                    message: e.to_string(),
                    stderr: e.stderr().map(str::to_string),
                });
            }
        };

        if !expected.exists() {
            reconcile_output(output_dir, &base, &target, input_path, &expected)?;
        }

        if !expected.is_file() {
            let stderr = output.stderr.trim();
            return Err(PipelineError::Conversion {
                message: format!("Output file not generated: {}", expected.display()),
                stderr: (!stderr.is_empty()).then(|| stderr.to_string()),
            });
        }

        info!(output = %expected.display(), "Conversion finished");
        Ok(JobOutput::new(expected))
    }
}
