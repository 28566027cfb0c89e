//! Ephemeral artifact management.
//!
//! All job files live in one shared staging directory. Collisions between
//! concurrent jobs are avoided purely through unique file names. Deferred
//! deletion goes through the [`CleanupScheduler`] hook so the host decides
//! when deletions actually run; the pipeline never owns a timer. Long-lived
//! hosts drive [`DeferredDeletions`] with [`start_sweeper`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};

/// Host-provided hook for deleting a path after a delay
pub trait CleanupScheduler: Send + Sync {
    fn schedule_cleanup(&self, path: &Path, after: Duration);
}

/// Delete a file or directory tree.
///
/// Returns `Ok(false)` when the path was already gone.
pub fn delete_artifact(path: &Path) -> std::io::Result<bool> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Unique name of the form `<prefix>-<unix millis>-<random>[.<ext>]`
pub fn unique_name(prefix: &str, extension: Option<&str>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    let stem = format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), suffix);
    match extension {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

/// Staging directory owner and deletion front-end for the pipeline
#[derive(Clone)]
pub struct ArtifactManager {
    staging_dir: PathBuf,
    scheduler: Arc<dyn CleanupScheduler>,
}

impl ArtifactManager {
    pub fn new(staging_dir: impl Into<PathBuf>, scheduler: Arc<dyn CleanupScheduler>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            scheduler,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Make sure the staging directory exists and return it
    pub fn ensure_staging_dir(&self) -> PipelineResult<&Path> {
        ensure_dir(&self.staging_dir)?;
        Ok(&self.staging_dir)
    }

    /// Delete an artifact now, logging rather than failing
    pub fn delete(&self, path: &Path) -> bool {
        match delete_artifact(path) {
            Ok(removed) => {
                if removed {
                    debug!(path = %path.display(), "Deleted artifact");
                }
                removed
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete artifact");
                false
            }
        }
    }

    /// Ask the host to delete `path` once `after` has elapsed
    pub fn schedule_cleanup(&self, path: &Path, after: Duration) {
        debug!(path = %path.display(), after_secs = after.as_secs(), "Scheduling cleanup");
        self.scheduler.schedule_cleanup(path, after);
    }

    /// Remove staging entries whose modification time is older than `max_age`.
    pub fn sweep_stale(&self, max_age: Duration) -> PipelineResult<usize> {
        let entries = match std::fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PipelineError::io("reading staging directory", e)),
        };

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age && self.delete(&path) {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, dir = %self.staging_dir.display(), "Swept stale artifacts");
        }
        Ok(removed)
    }
}

pub(crate) fn ensure_dir(dir: &Path) -> PipelineResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| PipelineError::io(format!("creating directory {}", dir.display()), e))
}

/// Deadline-based deletion registry for hosts.
///
/// `schedule_cleanup` only records a deadline. The host calls
/// [`DeferredDeletions::sweep_due`] periodically, or [`DeferredDeletions::flush`]
/// before shutting down.
#[derive(Default)]
pub struct DeferredDeletions {
    pending: DashMap<PathBuf, Instant>,
}

impl DeferredDeletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    /// Delete every entry whose deadline has passed
    pub fn sweep_due(&self) -> usize {
        let now = Instant::now();
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| entry.key().clone())
            .collect();
        self.delete_entries(due)
    }

    /// Delete every pending entry regardless of deadline
    pub fn flush(&self) -> usize {
        let all: Vec<PathBuf> = self.pending.iter().map(|e| e.key().clone()).collect();
        self.delete_entries(all)
    }

    fn delete_entries(&self, paths: Vec<PathBuf>) -> usize {
        let mut removed = 0;
        for path in paths {
            self.pending.remove(&path);
            match delete_artifact(&path) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Deferred deletion failed"),
            }
        }
        removed
    }
}

/// Sweep due deletions on a fixed interval until the handle is aborted
pub fn start_sweeper(
    deletions: Arc<DeferredDeletions>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let removed = deletions.sweep_due();
            if removed > 0 {
                debug!(removed, "Swept due deletions");
            }
        }
    })
}

impl CleanupScheduler for DeferredDeletions {
    fn schedule_cleanup(&self, path: &Path, after: Duration) {
        let deadline = Instant::now() + after;
        // A later request never shortens an existing deadline
        self.pending
            .entry(path.to_path_buf())
            .and_modify(|d| *d = (*d).max(deadline))
            .or_insert(deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names_differ() {
        let a = unique_name("lo_profile", None);
        let b = unique_name("lo_profile", None);
        assert_ne!(a, b);
        assert!(a.starts_with("lo_profile-"));

        let c = unique_name("signed", Some("pdf"));
        assert!(c.ends_with(".pdf"));
    }

    #[test]
    fn test_delete_artifact_handles_files_dirs_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.pdf");
        std::fs::write(&file, b"%PDF").unwrap();
        let tree = dir.path().join("profile");
        std::fs::create_dir_all(tree.join("user/config")).unwrap();
        std::fs::write(tree.join("user/config/registry.xcu"), b"x").unwrap();

        assert!(delete_artifact(&file).unwrap());
        assert!(delete_artifact(&tree).unwrap());
        assert!(!delete_artifact(&file).unwrap());
        assert!(!tree.exists());
    }

    #[test]
    fn test_ensure_staging_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("a/b/staging");
        let manager = ArtifactManager::new(&staging, Arc::new(DeferredDeletions::new()));

        assert_eq!(manager.ensure_staging_dir().unwrap(), staging.as_path());
        assert!(staging.is_dir());
        // Idempotent
        manager.ensure_staging_dir().unwrap();
    }

    #[test]
    fn test_deferred_deletions_respect_deadlines() {
        let dir = tempfile::tempdir().unwrap();
        let soon = dir.path().join("soon.pdf");
        let later = dir.path().join("later.pdf");
        std::fs::write(&soon, b"a").unwrap();
        std::fs::write(&later, b"b").unwrap();

        let deletions = DeferredDeletions::new();
        deletions.schedule_cleanup(&soon, Duration::ZERO);
        deletions.schedule_cleanup(&later, Duration::from_secs(3600));
        assert_eq!(deletions.pending(), 2);

        assert_eq!(deletions.sweep_due(), 1);
        assert!(!soon.exists());
        assert!(later.exists());
        assert!(deletions.is_pending(&later));

        assert_eq!(deletions.flush(), 1);
        assert!(!later.exists());
        assert_eq!(deletions.pending(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_deletes_due_entries() {
        let dir = tempfile::tempdir().unwrap();
        let due = dir.path().join("due.pdf");
        let held = dir.path().join("held.pdf");
        std::fs::write(&due, b"a").unwrap();
        std::fs::write(&held, b"b").unwrap();

        let deletions = Arc::new(DeferredDeletions::new());
        deletions.schedule_cleanup(&due, Duration::from_millis(20));
        deletions.schedule_cleanup(&held, Duration::from_secs(3600));

        let sweeper = start_sweeper(deletions.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;
        sweeper.abort();

        assert!(!due.exists());
        assert!(held.exists());
        assert!(deletions.is_pending(&held));
        assert!(!deletions.is_pending(&due));
    }

    #[test]
    fn test_rescheduling_keeps_later_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        std::fs::write(&path, b"a").unwrap();

        let deletions = DeferredDeletions::new();
        deletions.schedule_cleanup(&path, Duration::from_secs(3600));
        deletions.schedule_cleanup(&path, Duration::ZERO);

        assert_eq!(deletions.sweep_due(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_sweep_stale_only_removes_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fresh.pdf"), b"a").unwrap();
        let manager = ArtifactManager::new(dir.path(), Arc::new(DeferredDeletions::new()));

        assert_eq!(manager.sweep_stale(Duration::from_secs(3600)).unwrap(), 0);
        assert!(dir.path().join("fresh.pdf").exists());

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(manager.sweep_stale(Duration::from_millis(1)).unwrap(), 1);
        assert!(!dir.path().join("fresh.pdf").exists());
    }

    #[test]
    fn test_sweep_stale_missing_dir_is_noop() {
        let manager = ArtifactManager::new(
            "/nonexistent/docpipe/staging",
            Arc::new(DeferredDeletions::new()),
        );
        assert_eq!(manager.sweep_stale(Duration::ZERO).unwrap(), 0);
    }
}
