//! Atomic publication of located payloads.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempPath;

use crate::config::{ConflictPolicy, PublishMode};
use crate::error::{Error, Result};
use crate::pipeline::digest::sha256_file;

/// What publishing did to the target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishOutcome {
    /// Target did not exist before
    Created,
    /// Target held different content and was replaced
    Replaced,
    /// Target already held identical content
    Unchanged,
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Replaced => write!(f, "replaced"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// A model file available at its stable path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedArtifact {
    /// Stable path read by training jobs
    pub target: PathBuf,
    /// File holding the bytes (the target itself, or a blob for symlinks)
    pub backing: PathBuf,
    /// Source string that produced the content
    pub origin: String,
    pub sha256: String,
    pub outcome: PublishOutcome,
}

/// Moves or links payloads into place.
///
/// The only mutation of a target path is a single `rename` onto it, performed
/// after the payload is complete, so readers see either the old or the new
/// file and never a partial one.
#[derive(Debug, Clone)]
pub struct Publisher {
    mode: PublishMode,
    conflict: ConflictPolicy,
    blob_dir: PathBuf,
}

impl Publisher {
    pub fn new(mode: PublishMode, conflict: ConflictPolicy, blob_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            conflict,
            blob_dir: blob_dir.into(),
        }
    }

    pub fn publish(&self, payload: &Path, target: &Path, origin: &str) -> Result<PublishedArtifact> {
        let parent = target
            .parent()
            .ok_or_else(|| Error::publish(target, "target has no parent directory"))?;
        fs::create_dir_all(parent).map_err(|e| Error::publish(target, e))?;

        let sha256 = sha256_file(payload)?;
        let existing = existing_digest(target).map_err(|e| Error::publish(target, e))?;

        let outcome = match existing {
            None => PublishOutcome::Created,
            Some(ref current) if *current == sha256 => {
                log::info!("{:?} already up to date", target);
                return Ok(PublishedArtifact {
                    target: target.to_path_buf(),
                    backing: fs::canonicalize(target).map_err(|e| Error::publish(target, e))?,
                    origin: origin.to_string(),
                    sha256,
                    outcome: PublishOutcome::Unchanged,
                });
            }
            Some(_) if self.conflict == ConflictPolicy::Refuse => {
                return Err(Error::publish(
                    target,
                    "existing target holds different content",
                ));
            }
            Some(_) => PublishOutcome::Replaced,
        };

        let backing = match self.mode {
            PublishMode::Move => self.publish_move(payload, target, parent)?,
            PublishMode::Symlink => self.publish_symlink(payload, target, parent, &sha256)?,
        };

        log::info!("Published {:?} ({})", target, outcome);
        Ok(PublishedArtifact {
            target: target.to_path_buf(),
            backing,
            origin: origin.to_string(),
            sha256,
            outcome,
        })
    }

    fn publish_move(&self, payload: &Path, target: &Path, parent: &Path) -> Result<PathBuf> {
        let temp = sibling_temp(target, parent)?;
        move_file(payload, &temp).map_err(|e| Error::publish(target, e))?;
        temp.persist(target)
            .map_err(|e| Error::publish(target, e.error))?;
        Ok(target.to_path_buf())
    }

    #[cfg(unix)]
    fn publish_symlink(
        &self,
        payload: &Path,
        target: &Path,
        parent: &Path,
        sha256: &str,
    ) -> Result<PathBuf> {
        let extension = target
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let blob = self.blob_dir.join(format!("{}{}", sha256, extension));

        if !blob.is_file() {
            fs::create_dir_all(&self.blob_dir).map_err(|e| Error::publish(target, e))?;
            let temp = sibling_temp(&blob, &self.blob_dir)?;
            move_file(payload, &temp).map_err(|e| Error::publish(target, e))?;
            temp.persist(&blob)
                .map_err(|e| Error::publish(target, e.error))?;
        }
        let blob = fs::canonicalize(&blob).map_err(|e| Error::publish(target, e))?;

        let previous = fs::read_link(target).ok();

        // Build the link beside the target, then swap it in.
        let link = sibling_temp(target, parent)?;
        fs::remove_file(&link).map_err(|e| Error::publish(target, e))?;
        std::os::unix::fs::symlink(&blob, &link).map_err(|e| Error::publish(target, e))?;
        link.persist(target)
            .map_err(|e| Error::publish(target, e.error))?;

        if let Some(previous) = previous.filter(|old| *old != blob) {
            self.release_blob(&previous);
        }

        Ok(blob)
    }

    /// Remove a replaced blob once no link under the model tree points at it.
    #[cfg(unix)]
    fn release_blob(&self, blob: &Path) {
        let Ok(store) = fs::canonicalize(&self.blob_dir) else {
            return;
        };
        if blob.parent() != Some(store.as_path()) {
            return;
        }
        let Some(root) = store.parent() else {
            return;
        };

        match link_targets(root) {
            Ok(live) if !live.iter().any(|target| target == blob) => {
                match fs::remove_file(blob) {
                    Ok(()) => log::debug!("Removed unreferenced blob {:?}", blob),
                    Err(e) => log::warn!("Failed to remove blob {:?}: {}", blob, e),
                }
            }
            Ok(_) => log::debug!("Blob {:?} is still linked; keeping it", blob),
            Err(e) => log::warn!("Failed to scan {:?} for blob links: {}", root, e),
        }
    }

    #[cfg(not(unix))]
    fn publish_symlink(
        &self,
        payload: &Path,
        target: &Path,
        parent: &Path,
        _sha256: &str,
    ) -> Result<PathBuf> {
        log::warn!("Symlink publishing is unsupported on this platform; moving instead");
        self.publish_move(payload, target, parent)
    }
}

/// Digest of the file currently reachable at `target`, if any.
fn existing_digest(target: &Path) -> io::Result<Option<String>> {
    match fs::metadata(target) {
        Ok(meta) if meta.is_file() => sha256_file(target).map(Some),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "target exists and is not a regular file",
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Destinations of every symlink under `root`, skipping hidden directories.
#[cfg(unix)]
fn link_targets(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut targets = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                targets.push(fs::read_link(entry.path())?);
            } else if file_type.is_dir() && !entry.file_name().to_string_lossy().starts_with('.') {
                pending.push(entry.path());
            }
        }
    }

    Ok(targets)
}

/// Reserve a hidden temp path in the target's directory.
fn sibling_temp(target: &Path, parent: &Path) -> Result<TempPath> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".tmp")
        .tempfile_in(parent)
        .map(|file| file.into_temp_path())
        .map_err(|e| Error::publish(target, e))
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
