//! Per-reference scratch directories.

use std::path::Path;
use std::time::SystemTime;

use tempfile::TempDir;

use crate::error::Result;

/// A disposable directory holding one in-progress download.
///
/// Each pipeline run gets a fresh area. The directory is removed when the
/// value is dropped, so an early `?` return cleans up as well.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
    created_at: SystemTime,
}

impl StagingArea {
    /// Create a new staging area under `root`.
    ///
    /// Staging lives beside the published tree so the final rename stays on
    /// one filesystem.
    pub fn create(root: &Path, label: &str) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", label))
            .tempdir_in(root)?;
        log::debug!("Created staging area {:?}", dir.path());
        Ok(Self {
            dir,
            created_at: SystemTime::now(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Remove the staging directory, logging instead of failing.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            log::warn!("Failed to remove staging area {:?}: {}", path, e);
        }
    }
}
