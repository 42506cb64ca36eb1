//! Advisory locks serializing work on one target path.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use crate::error::{Error, Result};

/// Exclusive lock on `<lock_dir>/<key>.lock`, released on drop.
///
/// Two processes provisioning the same logical model wait for each other
/// instead of interleaving their publish and record steps.
#[derive(Debug)]
pub struct TargetLock {
    _file: File,
    path: PathBuf,
}

impl TargetLock {
    /// Wait for the lock on a blocking thread so the runtime keeps running.
    pub async fn acquire(lock_dir: &Path, key: &str) -> Result<Self> {
        std::fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(format!("{}.lock", key));

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        let lock_failed = |reason: String| Error::Lock(format!("{}: {}", path.display(), reason));
        let file = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|()| file))
            .await
            .map_err(|e| lock_failed(e.to_string()))?
            .map_err(|e| lock_failed(e.to_string()))?;

        log::debug!("Acquired lock {:?}", path);
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
