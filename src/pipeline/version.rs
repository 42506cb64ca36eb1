//! Version markers recording which source produced a published artifact.

use std::fs;
use std::path::{Path, PathBuf};

use crate::defaults;
use crate::error::{Error, Result};
use crate::model::encode_component;

/// An empty sentinel file named after the encoded source string.
///
/// Its existence says which source was last published. It carries no
/// checksum and says nothing about the artifact's current content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMarker {
    pub path: PathBuf,
    pub encoded_source: String,
}

/// Longest file name common filesystems accept.
const MAX_FILE_NAME_BYTES: usize = 255;

/// Writes markers under `<base>/version/`.
#[derive(Debug, Clone)]
pub struct VersionRecorder {
    dir: PathBuf,
}

impl VersionRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Marker path for a source string.
    pub fn marker_path(&self, source: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            encode_component(source),
            defaults::VERSION_SUFFIX
        ))
    }

    /// Fail with `RecordFailed` if the marker name for `source` is too long
    /// to ever be created.
    pub fn check_name(&self, source: &str) -> Result<()> {
        let path = self.marker_path(source);
        let len = path.file_name().map(|name| name.len()).unwrap_or(0);
        if len > MAX_FILE_NAME_BYTES {
            log::warn!(
                "Version marker name for '{}' is {} bytes; use a shorter source identifier",
                source,
                len
            );
            return Err(Error::RecordFailed {
                marker: path,
                reason: format!(
                    "marker name is {} bytes, over the {}-byte file name limit",
                    len, MAX_FILE_NAME_BYTES
                ),
            });
        }
        Ok(())
    }

    /// Create or overwrite the marker for `source`.
    pub fn record(&self, source: &str) -> Result<VersionMarker> {
        self.check_name(source)?;
        let path = self.marker_path(source);
        let failed = |e: std::io::Error| Error::RecordFailed {
            marker: path.clone(),
            reason: e.to_string(),
        };

        fs::create_dir_all(&self.dir).map_err(failed)?;
        fs::File::create(&path).map_err(failed)?;

        log::debug!("Recorded version marker {:?}", path);
        Ok(VersionMarker {
            encoded_source: encode_component(source),
            path,
        })
    }

    pub fn is_recorded(&self, source: &str) -> bool {
        self.marker_path(source).is_file()
    }

    /// Encoded sources of all markers, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let suffix = format!(".{}", defaults::VERSION_SUFFIX);
        let mut markers = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(encoded) = name.strip_suffix(&suffix) {
                markers.push(encoded.to_string());
            }
        }
        markers.sort();
        Ok(markers)
    }
}
