//! Archive extraction and payload location.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use zip::ZipArchive;

use crate::config::TieBreak;
use crate::error::{Error, Result};
use crate::model::ArchiveKind;
use crate::pipeline::fetch::{Fetched, PayloadLayout};
use crate::pipeline::staging::StagingArea;

const EXTRACT_DIR: &str = "extracted";

/// Reduce a fetched payload to the single model file it contains.
///
/// Archives are extracted into `<staging>/extracted`; archive and registry
/// trees are then searched for files ending in `.{extension}`.
pub fn locate(
    fetched: &Fetched,
    staging: &StagingArea,
    extension: &str,
    tie_break: TieBreak,
) -> Result<PathBuf> {
    match fetched.layout {
        PayloadLayout::File => Ok(fetched.path.clone()),
        PayloadLayout::Archive(kind) => {
            let dest = staging.path().join(EXTRACT_DIR);
            let extracted = extract_archive(kind, &fetched.path, &dest)?;
            log::debug!("Extracted {} files from {:?}", extracted.len(), fetched.path);
            select_candidate(&dest, extracted, extension, tie_break)
        }
        PayloadLayout::Directory => {
            let files = list_files(&fetched.path)?;
            select_candidate(&fetched.path, files, extension, tie_break)
        }
    }
}

/// Extract an archive into `dest`, returning the relative paths of the
/// regular files written.
pub fn extract_archive(kind: ArchiveKind, archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;
    match kind {
        ArchiveKind::Zip => extract_zip(archive, dest),
        ArchiveKind::TarGz => extract_tar(GzDecoder::new(File::open(archive)?), dest),
        ArchiveKind::Tar => extract_tar(File::open(archive)?, dest),
    }
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = Archive::new(reader);
    let mut written = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        check_entry_path(&path.to_string_lossy())?;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let out = dest.join(&path);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&out)?;
        io::copy(&mut entry, &mut file)?;
        written.push(path);
    }

    Ok(written)
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive =
        ZipArchive::new(File::open(archive)?).map_err(|e| Error::Extract(e.to_string()))?;
    let mut written = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| Error::Extract(e.to_string()))?;
        check_entry_path(entry.name())?;
        let path = entry
            .enclosed_name()
            .ok_or_else(|| Error::Extract(format!("Unsafe path in archive: {}", entry.name())))?;

        if entry.is_dir() {
            fs::create_dir_all(dest.join(&path))?;
            continue;
        }

        let out = dest.join(&path);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&out)?;
        io::copy(&mut entry, &mut file)?;
        written.push(path);
    }

    Ok(written)
}

fn check_entry_path(path: &str) -> Result<()> {
    let escapes = path.split(['/', '\\']).any(|part| part == "..");
    if path.starts_with('/') || path.starts_with('\\') || escapes {
        return Err(Error::Extract(format!("Unsafe path in archive: {}", path)));
    }
    Ok(())
}

/// Regular files under `root`, relative to it, in sorted order.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                if let Ok(relative) = entry.path().strip_prefix(root) {
                    files.push(relative.to_path_buf());
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Pick the payload among `files` (relative to `root`).
///
/// Candidates are the files whose name ends in `.{extension}`. They are
/// sorted before the tie-break applies, so the result never depends on
/// archive or directory listing order.
pub fn select_candidate(
    root: &Path,
    files: Vec<PathBuf>,
    extension: &str,
    tie_break: TieBreak,
) -> Result<PathBuf> {
    let suffix = format!(".{}", extension.to_ascii_lowercase());
    let mut candidates: Vec<PathBuf> = files
        .into_iter()
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().to_ascii_lowercase().ends_with(&suffix))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates.dedup();

    let chosen = match (candidates.len(), tie_break) {
        (1, _) | (2.., TieBreak::LexicographicFirst) => candidates.swap_remove(0),
        _ => {
            return Err(Error::AmbiguousArchiveContents {
                dir: root.to_path_buf(),
                candidates,
            })
        }
    };

    Ok(root.join(chosen))
}
