use std::path::Path;

use thiserror::Error;

use crate::i18n::I18n;
use crate::tools::Tool;

/// Main pipeline error type
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{} could not be executed (is it installed?)", .tool.product_name())]
    ToolNotFound { tool: Tool },

    #[error("System conversion error: {message}")]
    Conversion {
        message: String,
        stderr: Option<String>,
    },

    #[error("Failed to compress PDF: {message}")]
    Compression {
        message: String,
        stderr: Option<String>,
    },

    #[error("Incorrect password")]
    WrongPassword { stderr: String },

    #[error("PDF encryption failed: {message}")]
    Encryption {
        /// Set when removing protection rather than applying it
        unlock: bool,
        message: String,
        stderr: Option<String>,
    },

    #[error("Failed to add watermark: {message}")]
    Watermark { message: String },

    #[error("Failed to apply signature: {message}")]
    Signature { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("IO error while {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Failures raised by the process runner
#[derive(Error, Debug)]
pub enum ExternalToolError {
    #[error("Command not found: {program}")]
    NotFound { program: String },

    #[error("Failed to spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "{program} failed ({}): {}",
        .status.map_or_else(|| "no exit code".to_string(), |c| format!("exit code {c}")),
        .stderr.trim()
    )]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
}

impl ExternalToolError {
    /// Captured stderr, if the process ran at all
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ExternalToolError::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// True when the OS (or a shell wrapper) reported the binary as missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            ExternalToolError::NotFound { .. } => true,
            ExternalToolError::Spawn { .. } => false,
            ExternalToolError::Failed { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                stderr.contains("is not recognized") || stderr.contains("command not found")
            }
        }
    }

    /// Exit status of a process that ran and failed
    pub fn status(&self) -> Option<i32> {
        match self {
            ExternalToolError::Failed { status, .. } => *status,
            _ => None,
        }
    }

    /// Stderr if present, otherwise the display message.
    pub(crate) fn detail(&self) -> String {
        self.stderr()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.to_string())
    }
}

impl PipelineError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        PipelineError::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn missing_input(path: &Path) -> Self {
        Self::invalid_input(format!("input file does not exist: {}", path.display()))
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::ToolNotFound { .. } => "tool_not_found",
            PipelineError::Conversion { .. } => "conversion_error",
            PipelineError::Compression { .. } => "compression_error",
            PipelineError::WrongPassword { .. } => "wrong_password",
            PipelineError::Encryption { .. } => "encryption_error",
            PipelineError::Watermark { .. } => "watermark_error",
            PipelineError::Signature { .. } => "signature_error",
            PipelineError::InvalidInput { .. } => "invalid_input",
            PipelineError::Io { .. } => "io_error",
            PipelineError::Config { .. } => "config_error",
        }
    }

    /// Raw stderr of the failing external process, when one was involved.
    ///
    /// Password detection relies on tool-specific phrasing, so callers get the
    /// original text to apply their own heuristics.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            PipelineError::Conversion { stderr, .. }
            | PipelineError::Compression { stderr, .. }
            | PipelineError::Encryption { stderr, .. } => stderr.as_deref(),
            PipelineError::WrongPassword { stderr } => Some(stderr),
            _ => None,
        }
    }

    /// Get a user-friendly translated message
    pub fn user_message(&self, i18n: &I18n, locale: &str) -> String {
        match self {
            PipelineError::ToolNotFound { tool } => i18n.format(
                locale,
                "error-tool-not-found",
                &[("tool", tool.product_name())],
            ),
            PipelineError::WrongPassword { .. } => i18n.get(locale, "error-wrong-password", None),
            PipelineError::Encryption {
                unlock,
                message,
                stderr,
            } => i18n.format(
                locale,
                if *unlock {
                    "error-unlock"
                } else {
                    "error-protect"
                },
                &[("detail", stderr.as_deref().unwrap_or(message).trim())],
            ),
            PipelineError::Conversion { message, stderr } => i18n.format(
                locale,
                "error-conversion",
                &[("detail", stderr.as_deref().unwrap_or(message))],
            ),
            PipelineError::Compression { message, stderr } => i18n.format(
                locale,
                "error-compression",
                &[("detail", stderr.as_deref().unwrap_or(message))],
            ),
            PipelineError::Watermark { message } => {
                i18n.format(locale, "error-watermark", &[("detail", message)])
            }
            PipelineError::Signature { message } => {
                i18n.format(locale, "error-signature", &[("detail", message)])
            }
            PipelineError::Io { .. } => i18n.get(locale, "error-internal", None),
            // For other errors, fall back to the technical message
            _ => self.to_string(),
        }
    }
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Format an error with its full source chain, for logging.
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
