//! Document pipeline orchestration.
//!
//! [`DocumentPipeline`] owns the collaborators every engine needs (tool
//! locator, process runner, artifact manager) and exposes one async method per
//! operation. Each engine lives in its own submodule as an `impl` block:
//! - Conversion between office/image formats and PDF
//! - Compression through the rasterizer
//! - Password protection and removal
//! - Watermark stamping and best-effort watermark removal
//! - Signature stamping
//!
//! Jobs share no mutable state; concurrent calls only share the staging
//! directory, where file names are unique per job.

mod cleanup;
mod compression;
mod conversion;
mod protection;
mod signature;
mod watermark;

pub use cleanup::{CleanupReport, CleanupStage, StageOutcome, StageRecord, best_artifact};
pub use compression::CompressionLevel;
pub use protection::is_wrong_password;
pub use signature::SignaturePlacement;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::artifacts::{ArtifactManager, CleanupScheduler, delete_artifact};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::job::JobOutput;
use crate::tools::ToolLocator;
use crate::process::ProcessRunner;

/// Coordinates the document engines for one host
pub struct DocumentPipeline {
    config: Arc<PipelineConfig>,
    locator: ToolLocator,
    runner: Arc<dyn ProcessRunner>,
    artifacts: ArtifactManager,
}

impl DocumentPipeline {
    /// Pipeline for the current host, probing the real filesystem for tools
    pub fn new(
        config: Arc<PipelineConfig>,
        runner: Arc<dyn ProcessRunner>,
        scheduler: Arc<dyn CleanupScheduler>,
    ) -> Self {
        let locator = ToolLocator::from_env().with_overrides(&config.tools);
        Self::with_locator(config, locator, runner, scheduler)
    }

    pub fn with_locator(
        config: Arc<PipelineConfig>,
        locator: ToolLocator,
        runner: Arc<dyn ProcessRunner>,
        scheduler: Arc<dyn CleanupScheduler>,
    ) -> Self {
        let artifacts = ArtifactManager::new(config.staging.dir.clone(), scheduler);
        Self {
            config,
            locator,
            runner,
            artifacts,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn locator(&self) -> &ToolLocator {
        &self.locator
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    /// Hand an output to the host's deletion schedule once it has been
    /// delivered to the caller.
    pub fn release(&self, output: &JobOutput) {
        self.artifacts
            .schedule_cleanup(&output.output_path, self.config.staging.output_ttl());
    }
}

/// The source must still be a readable regular file when an engine starts
pub(crate) fn check_source(path: &Path) -> PipelineResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::missing_input(path))
    }
}

/// Refuse outputs that would overwrite the source document
pub(crate) fn ensure_distinct(output: &Path, source: &Path) -> PipelineResult<()> {
    let same = match (output.canonicalize(), source.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if same {
        return Err(PipelineError::invalid_input(format!(
            "output {} would overwrite the source document",
            output.display()
        )));
    }
    Ok(())
}

/// Remove a leftover artifact so its presence can serve as proof of success
pub(crate) fn clear_stale(path: &Path) -> PipelineResult<()> {
    if delete_artifact(path)
        .map_err(|e| PipelineError::io(format!("removing stale {}", path.display()), e))?
    {
        debug!(path = %path.display(), "Removed stale artifact");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use crate::artifacts::DeferredDeletions;
    use crate::config::PipelineConfig;
    use crate::process::testing::ScriptedRunner;
    use crate::tools::{LocatorEnv, Platform, RealFs, ToolLocator};

    use super::DocumentPipeline;

    pub(crate) struct Harness {
        pub pipeline: DocumentPipeline,
        pub runner: Arc<ScriptedRunner>,
        pub deletions: Arc<DeferredDeletions>,
        pub dir: tempfile::TempDir,
    }

    impl Harness {
        pub(crate) fn staging(&self) -> &Path {
            self.dir.path()
        }

        /// Write a file into the staging directory
        pub(crate) fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path
        }
    }

    pub(crate) fn harness(runner: ScriptedRunner) -> Harness {
        harness_on(Platform::Posix, runner)
    }

    pub(crate) fn harness_on(platform: Platform, runner: ScriptedRunner) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.staging.dir = dir.path().to_path_buf();

        let env = LocatorEnv {
            platform,
            program_files: dir.path().join("no-program-files"),
            program_files_x86: dir.path().join("no-program-files-x86"),
        };
        let runner = Arc::new(runner);
        let deletions = Arc::new(DeferredDeletions::new());
        let pipeline = DocumentPipeline::with_locator(
            Arc::new(config),
            ToolLocator::new(env, Arc::new(RealFs)),
            runner.clone(),
            deletions.clone(),
        );

        Harness {
            pipeline,
            runner,
            deletions,
            dir,
        }
    }
}
