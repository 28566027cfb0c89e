//! Best-effort watermark removal.
//!
//! A fixed chain of independent remediation stages. Each stage works on the
//! best artifact so far and either succeeds with a new file or is skipped
//! with a reason; a skipped stage never aborts the chain. The final output is
//! the last successful stage's file, or a verbatim copy of the (normalized)
//! input when every stage declined.

use std::path::{Path, PathBuf};

use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifacts::{delete_artifact, ensure_dir};
use crate::error::{PipelineError, PipelineResult, format_error_chain};
use crate::job::{JobOutput, extension_of, stem_of};
use crate::pdf;
use crate::process::Invocation;
use crate::tools::Tool;

use super::{DocumentPipeline, check_source, clear_stale};

/// Remediation stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum CleanupStage {
    /// Empty every page's annotation array
    AnnotationStrip,
    /// Rewrite through the rasterizer in PDF/A mode, merging overlays
    Flatten,
    /// Round-trip through the document converter
    Reencode,
    /// Linearize with the primary encryption tool
    Linearize,
}

impl CleanupStage {
    pub fn number(self) -> u8 {
        match self {
            CleanupStage::AnnotationStrip => 1,
            CleanupStage::Flatten => 2,
            CleanupStage::Reencode => 3,
            CleanupStage::Linearize => 4,
        }
    }

    /// `step<n>_<base>.pdf`
    pub fn artifact_name(self, base: &str) -> String {
        format!("step{}_{}.pdf", self.number(), base)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded(PathBuf),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: CleanupStage,
    pub outcome: StageOutcome,
}

/// The last successful stage's artifact, or `start` when none succeeded
pub fn best_artifact<'a>(start: &'a Path, records: &'a [StageRecord]) -> &'a Path {
    records
        .iter()
        .rev()
        .find_map(|record| match &record.outcome {
            StageOutcome::Succeeded(path) => Some(path.as_path()),
            StageOutcome::Skipped(_) => None,
        })
        .unwrap_or(start)
}

/// Result of a watermark removal run
#[derive(Debug, Clone)]
pub struct CleanupReport {
    pub output: JobOutput,
    pub stages: Vec<StageRecord>,
}

impl CleanupReport {
    pub fn succeeded(&self) -> usize {
        self.stages
            .iter()
            .filter(|r| matches!(r.outcome, StageOutcome::Succeeded(_)))
            .count()
    }
}

fn strip_annotations_to(current: &Path, target: &Path) -> Result<StageOutcome, String> {
    let mut doc = pdf::load_document(current).map_err(|e| format_error_chain(&e))?;
    let modified = pdf::strip_annotations(&mut doc);
    if modified == 0 {
        return Ok(StageOutcome::Skipped("no annotations found".to_string()));
    }
    pdf::save_document(&mut doc, target).map_err(|e| format_error_chain(&e))?;
    Ok(StageOutcome::Succeeded(target.to_path_buf()))
}

pub(crate) fn flatten_invocation(program: &Path, input: &Path, output: &Path) -> Invocation {
    Invocation::new(program)
        .args([
            "-dPDFA=1",
            "-dNOOUTERSAVE",
            "-sProcessColorModel=DeviceRGB",
            "-sDEVICE=pdfwrite",
            "-o",
        ])
        .arg(output)
        .arg("-dPDFACompatibilityPolicy=1")
        .arg(input)
}

pub(crate) fn linearize_invocation(program: &Path, input: &Path, output: &Path) -> Invocation {
    Invocation::new(program)
        .arg("--linearize")
        .arg(input)
        .arg(output)
}

impl DocumentPipeline {
    /// Strip watermark-like overlays, writing `<output_dir>/cleaned_<base>.pdf`.
    ///
    /// Fails only when a non-PDF input cannot be converted to PDF first.
    pub async fn remove_watermark(
        &self,
        input_path: &Path,
        output_dir: &Path,
    ) -> PipelineResult<JobOutput> {
        Ok(self.clean_document(input_path, output_dir).await?.output)
    }

    /// Like [`DocumentPipeline::remove_watermark`], also reporting each
    /// stage's outcome.
    pub async fn clean_document(
        &self,
        input_path: &Path,
        output_dir: &Path,
    ) -> PipelineResult<CleanupReport> {
        check_source(input_path)?;
        ensure_dir(output_dir)?;

        let base = stem_of(input_path);
        let final_path = output_dir.join(format!("cleaned_{}.pdf", base));

        let normalized = if extension_of(input_path).as_deref() == Some("pdf") {
            None
        } else {
            info!(input = %input_path.display(), "Normalizing input to PDF before cleanup");
            Some(self.convert(input_path, output_dir, "pdf").await?.output_path)
        };
        let start = normalized.clone().unwrap_or_else(|| input_path.to_path_buf());

        let mut stages: Vec<StageRecord> = Vec::new();
        for stage in CleanupStage::iter() {
            let current = best_artifact(&start, &stages).to_path_buf();
            let target = output_dir.join(stage.artifact_name(&base));
            let outcome = match self.run_stage(stage, &current, &target, output_dir).await {
                Ok(outcome) => outcome,
                Err(reason) => StageOutcome::Skipped(reason),
            };

            match &outcome {
                StageOutcome::Succeeded(path) => {
                    info!(stage = %stage, artifact = %path.display(), "Cleanup stage succeeded")
                }
                StageOutcome::Skipped(reason) => {
                    warn!(stage = %stage, reason = %reason, "Cleanup stage skipped")
                }
            }
            stages.push(StageRecord { stage, outcome });
        }

        let best = best_artifact(&start, &stages).to_path_buf();
        clear_stale(&final_path)?;
        tokio::fs::copy(&best, &final_path).await.map_err(|e| {
            PipelineError::io(
                format!("copying {} to {}", best.display(), final_path.display()),
                e,
            )
        })?;

        // Intermediates go, including the normalized PDF; the source stays
        let intermediates = stages
            .iter()
            .filter_map(|r| match &r.outcome {
                StageOutcome::Succeeded(path) => Some(path.clone()),
                StageOutcome::Skipped(_) => None,
            })
            .chain(normalized);
        for path in intermediates {
            if path != final_path && path != input_path {
                self.artifacts.delete(&path);
            }
        }

        let report = CleanupReport {
            output: JobOutput::new(final_path),
            stages,
        };
        info!(
            output = %report.output.output_path.display(),
            stages_succeeded = report.succeeded(),
            "Watermark removal finished"
        );
        Ok(report)
    }

    /// Run one stage. `Err` carries the reason the stage was skipped.
    async fn run_stage(
        &self,
        stage: CleanupStage,
        current: &Path,
        target: &Path,
        output_dir: &Path,
    ) -> Result<StageOutcome, String> {
        delete_artifact(target).map_err(|e| format!("cannot clear {}: {}", target.display(), e))?;

        match stage {
            CleanupStage::AnnotationStrip => {
                let (current, target) = (current.to_path_buf(), target.to_path_buf());
                tokio::task::spawn_blocking(move || strip_annotations_to(&current, &target))
                    .await
                    .map_err(|e| format!("annotation task failed: {}", e))?
            }
            CleanupStage::Flatten => {
                let rasterizer = self.locator.locate(Tool::Rasterizer);
                let invocation = flatten_invocation(&rasterizer.program, current, target);
                self.runner.run(&invocation).await.map_err(|e| e.detail())?;
                produced(target)
            }
            CleanupStage::Reencode => {
                // Private directory so the converter never writes over `current`
                let scratch = output_dir.join(format!("reencode_{}", Uuid::new_v4().simple()));
                let result = self.convert(current, &scratch, "pdf").await;
                let outcome = match result {
                    Ok(output) => std::fs::rename(&output.output_path, target)
                        .map_err(|e| format!("cannot adopt re-encoded file: {}", e))
                        .and_then(|()| produced(target)),
                    Err(e) => Err(format_error_chain(&e)),
                };
                self.artifacts.delete(&scratch);
                outcome
            }
            CleanupStage::Linearize => {
                let tool = self.locator.locate(Tool::EncryptionPrimary);
                let invocation = linearize_invocation(&tool.program, current, target);
                match self.runner.run(&invocation).await {
                    Ok(_) => {}
                    // "Succeeded with warnings"
                    Err(e) if e.status() == Some(3) && target.is_file() => {}
                    Err(e) => return Err(e.detail()),
                }
                produced(target)
            }
        }
    }
}

fn produced(target: &Path) -> Result<StageOutcome, String> {
    if target.is_file() {
        Ok(StageOutcome::Succeeded(target.to_path_buf()))
    } else {
        Err(format!("{} was not produced", target.display()))
    }
}
