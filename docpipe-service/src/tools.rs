//! External tool discovery.
//!
//! Resolves the command used to invoke each external binary. On POSIX hosts
//! package managers put the tools on `PATH`, so the bare name is returned
//! without touching the filesystem. On Windows the well-known install layouts
//! are probed, followed by a scan of the install root for versioned
//! directories. Resolution never fails: when nothing matches, the bare name is
//! returned so the process runner reports a plain "command not found".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tracing::debug;

use crate::config::ToolOverrides;

/// External tools driven by the pipeline, by logical role.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// Headless office suite used for format conversion
    DocumentConverter,
    /// PDF rasterizer used for compression and flattening
    Rasterizer,
    /// Primary PDF encryption / linearization tool
    EncryptionPrimary,
    /// Secondary encryption tool used when the primary fails
    EncryptionFallback,
}

/// Operating system family, for binary discovery purposes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }
}

/// Fixed install layout for one tool on Windows. All paths are relative to an
/// install root and given as path segments so they join correctly everywhere.
struct WindowsLayout {
    /// Candidates under `Program Files`
    fixed: &'static [&'static [&'static str]],
    /// Candidates under `Program Files (x86)`
    fixed_x86: &'static [&'static [&'static str]],
    /// Directory (under `Program Files`) whose children are scanned
    scan_root: &'static [&'static str],
    /// Case-insensitive prefix of versioned install directories
    family_prefix: &'static str,
    /// Binary location inside a matched install directory
    binary: &'static [&'static str],
}

impl Tool {
    /// Command name when relying on `PATH`
    pub fn bare_name(self, platform: Platform) -> &'static str {
        match (self, platform) {
            (Tool::DocumentConverter, _) => "soffice",
            (Tool::Rasterizer, Platform::Windows) => "gswin64c",
            (Tool::Rasterizer, Platform::Posix) => "gs",
            (Tool::EncryptionPrimary, _) => "qpdf",
            (Tool::EncryptionFallback, _) => "pdftk",
        }
    }

    /// Product name shown to end users in "install X" messages
    pub fn product_name(self) -> &'static str {
        match self {
            Tool::DocumentConverter => "LibreOffice",
            Tool::Rasterizer => "Ghostscript",
            Tool::EncryptionPrimary => "QPDF",
            Tool::EncryptionFallback => "PDFtk",
        }
    }

    fn windows_layout(self) -> WindowsLayout {
        match self {
            Tool::DocumentConverter => WindowsLayout {
                fixed: &[&["LibreOffice", "program", "soffice.exe"]],
                fixed_x86: &[&["LibreOffice", "program", "soffice.exe"]],
                scan_root: &[],
                family_prefix: "libreoffice",
                binary: &["program", "soffice.exe"],
            },
            Tool::Rasterizer => WindowsLayout {
                fixed: &[
                    &["gs", "gs10.06.0", "bin", "gswin64c.exe"],
                    &["gs", "gs10.04.0", "bin", "gswin64c.exe"],
                    &["gs", "gs10.03.1", "bin", "gswin64c.exe"],
                ],
                fixed_x86: &[],
                scan_root: &["gs"],
                family_prefix: "gs",
                binary: &["bin", "gswin64c.exe"],
            },
            Tool::EncryptionPrimary => WindowsLayout {
                fixed: &[
                    &["qpdf 12.2.0", "bin", "qpdf.exe"],
                    &["qpdf", "bin", "qpdf.exe"],
                ],
                fixed_x86: &[&["qpdf 12.2.0", "bin", "qpdf.exe"]],
                scan_root: &[],
                family_prefix: "qpdf",
                binary: &["bin", "qpdf.exe"],
            },
            Tool::EncryptionFallback => WindowsLayout {
                fixed: &[&["PDFtk", "bin", "pdftk.exe"]],
                fixed_x86: &[&["PDFtk Server", "bin", "pdftk.exe"]],
                scan_root: &[],
                family_prefix: "pdftk",
                binary: &["bin", "pdftk.exe"],
            },
        }
    }
}

/// Read-only filesystem capability used for probing install locations.
pub trait FsProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Names of the immediate children of `dir`; empty when unreadable.
    fn list_dir(&self, dir: &Path) -> Vec<String>;
}

/// Probe backed by the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl FsProbe for RealFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(&self, dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Host facts the locator depends on
#[derive(Debug, Clone)]
pub struct LocatorEnv {
    pub platform: Platform,
    pub program_files: PathBuf,
    pub program_files_x86: PathBuf,
}

impl LocatorEnv {
    /// Read the install roots from the process environment
    pub fn from_env() -> Self {
        Self {
            platform: Platform::current(),
            program_files: std::env::var_os("ProgramFiles")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(r"C:\Program Files")),
            program_files_x86: std::env::var_os("ProgramFiles(x86)")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(r"C:\Program Files (x86)")),
        }
    }
}

/// How a command was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Explicit path from configuration
    Configured,
    /// Found at a known install location
    Installed,
    /// Bare name, left to `PATH`
    Bare,
}

/// A resolved command for one tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    pub tool: Tool,
    pub program: PathBuf,
    pub resolution: Resolution,
}

impl ResolvedTool {
    fn bare(tool: Tool, platform: Platform) -> Self {
        Self {
            tool,
            program: PathBuf::from(tool.bare_name(platform)),
            resolution: Resolution::Bare,
        }
    }
}

fn join_segments(root: &Path, segments: &[&str]) -> PathBuf {
    segments.iter().fold(root.to_path_buf(), |p, s| p.join(s))
}

/// Resolve the command for `tool` without mutating any process state.
pub fn resolve_tool_path(tool: Tool, env: &LocatorEnv, probe: &dyn FsProbe) -> ResolvedTool {
    if env.platform == Platform::Posix {
        return ResolvedTool::bare(tool, env.platform);
    }

    let layout = tool.windows_layout();

    let fixed = layout
        .fixed
        .iter()
        .map(|segments| join_segments(&env.program_files, segments))
        .chain(
            layout
                .fixed_x86
                .iter()
                .map(|segments| join_segments(&env.program_files_x86, segments)),
        );

    for candidate in fixed {
        if probe.exists(&candidate) {
            return ResolvedTool {
                tool,
                program: candidate,
                resolution: Resolution::Installed,
            };
        }
    }

    // Versioned install directories, highest name first
    let scan_root = join_segments(&env.program_files, layout.scan_root);
    let mut dirs: Vec<String> = probe
        .list_dir(&scan_root)
        .into_iter()
        .filter(|name| name.to_lowercase().starts_with(layout.family_prefix))
        .collect();
    dirs.sort_by_cached_key(|name| {
        let lower = name.to_lowercase();
        std::cmp::Reverse((version_key(&lower[layout.family_prefix.len()..]), lower))
    });

    for dir in dirs {
        let candidate = join_segments(&scan_root.join(&dir), layout.binary);
        if probe.exists(&candidate) {
            return ResolvedTool {
                tool,
                program: candidate,
                resolution: Resolution::Installed,
            };
        }
    }

    debug!(tool = %tool, "No install location matched, relying on PATH");
    ResolvedTool::bare(tool, env.platform)
}

/// Numeric components of a version suffix, so `10.05.1` orders above `9.56.1`
fn version_key(suffix: &str) -> Vec<u32> {
    suffix
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|part| part.parse().ok())
        .collect()
}

/// Tool locator bound to a host environment and configured overrides
#[derive(Clone)]
pub struct ToolLocator {
    env: LocatorEnv,
    probe: Arc<dyn FsProbe>,
    overrides: HashMap<Tool, PathBuf>,
}

impl ToolLocator {
    pub fn new(env: LocatorEnv, probe: Arc<dyn FsProbe>) -> Self {
        Self {
            env,
            probe,
            overrides: HashMap::new(),
        }
    }

    /// Locator for the current host using the real filesystem
    pub fn from_env() -> Self {
        Self::new(LocatorEnv::from_env(), Arc::new(RealFs))
    }

    /// Apply configured binary paths, which bypass probing
    pub fn with_overrides(mut self, overrides: &ToolOverrides) -> Self {
        self.overrides = overrides.as_map();
        self
    }

    pub fn platform(&self) -> Platform {
        self.env.platform
    }

    /// Resolve the command for a tool
    pub fn locate(&self, tool: Tool) -> ResolvedTool {
        if let Some(program) = self.overrides.get(&tool) {
            return ResolvedTool {
                tool,
                program: program.clone(),
                resolution: Resolution::Configured,
            };
        }
        resolve_tool_path(tool, &self.env, self.probe.as_ref())
    }
}
