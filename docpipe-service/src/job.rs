//! Job inputs and outputs.

use std::path::{Path, PathBuf};

use mime::Mime;
use serde::Serialize;

use crate::config::LimitsConfig;
use crate::error::{PipelineError, PipelineResult};

/// Accepted upload types, by extension
const ACCEPTED_TYPES: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("doc", "application/msword"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("xls", "application/vnd.ms-excel"),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
];

/// Lowercased extension of a path, if any
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// File stem as a string, falling back to the lossy form
pub(crate) fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// File name as a string, falling back to the lossy form
pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Media type for an accepted extension
pub fn mime_for_extension(extension: &str) -> Option<Mime> {
    let extension = extension.to_ascii_lowercase();
    ACCEPTED_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .and_then(|(_, mime)| mime.parse().ok())
}

/// A validated, previously uploaded source file
#[derive(Debug, Clone)]
pub struct JobInput {
    pub source_path: PathBuf,
    pub mime: Mime,
    pub extension: String,
    pub size: u64,
}

impl JobInput {
    /// Check that the file exists, is readable, is small enough, and has an
    /// accepted type.
    pub fn validate(path: &Path, limits: &LimitsConfig) -> PipelineResult<Self> {
        let metadata = std::fs::metadata(path).map_err(|_| PipelineError::missing_input(path))?;
        if !metadata.is_file() {
            return Err(PipelineError::invalid_input(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        // Readability: opening is the only reliable check across platforms
        std::fs::File::open(path)
            .map_err(|e| PipelineError::io(format!("opening {}", path.display()), e))?;

        if metadata.len() > limits.max_input_bytes {
            return Err(PipelineError::invalid_input(format!(
                "file too large: {} bytes (max {} bytes)",
                metadata.len(),
                limits.max_input_bytes
            )));
        }

        let extension = extension_of(path).unwrap_or_default();
        let mime = mime_for_extension(&extension).ok_or_else(|| {
            PipelineError::invalid_input(format!("unsupported file type: .{}", extension))
        })?;

        Ok(Self {
            source_path: path.to_path_buf(),
            mime,
            extension,
            size: metadata.len(),
        })
    }

    pub fn is_pdf(&self) -> bool {
        self.mime == mime::APPLICATION_PDF
    }

    pub fn is_image(&self) -> bool {
        self.mime.type_() == mime::IMAGE
    }
}

/// A generated artifact, ready to be served to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutput {
    pub output_path: PathBuf,
    /// Download name presented to the end user
    pub filename: String,
}

impl JobOutput {
    pub fn new(output_path: PathBuf) -> Self {
        let filename = file_name_of(&output_path);
        Self {
            output_path,
            filename,
        }
    }
}
