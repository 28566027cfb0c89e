//! Document pipeline orchestration.
//!
//! Converts, compresses, protects, watermarks, cleans and signs documents by
//! driving external tools (office converter, PDF rasterizer, encryption
//! tools) and editing PDFs in-process. The host supplies a staging directory,
//! a [`process::ProcessRunner`] and a [`artifacts::CleanupScheduler`]; the
//! core owns no timers and no global state.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod i18n;
pub mod job;
pub mod pdf;
pub mod pipeline;
pub mod process;
pub mod tools;
pub mod watermark;

pub use artifacts::{ArtifactManager, CleanupScheduler, DeferredDeletions, start_sweeper};
pub use config::{PipelineConfig, load_config};
pub use error::{ExternalToolError, PipelineError, PipelineResult};
pub use i18n::I18n;
pub use job::{JobInput, JobOutput};
pub use pipeline::{
    CleanupReport, CleanupStage, CompressionLevel, DocumentPipeline, SignaturePlacement,
    StageOutcome,
};
pub use process::{Invocation, ProcessRunner, TokioProcessRunner};
pub use tools::{Tool, ToolLocator};
pub use watermark::{Anchor, PageSelector, WatermarkConfig, WatermarkKind};
