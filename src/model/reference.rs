//! Model references and source classification.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

const URL_SCHEMES: &[&str] = &["http://", "https://", "ftp://"];
/// Schemes the HTTP client can actually download.
const FETCHABLE_SCHEMES: &[&str] = &["http://", "https://"];

/// How a model source string is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Network location fetched over HTTP
    DirectUrl,
    /// Opaque identifier pulled with the registry client
    Registry,
}

impl SourceKind {
    /// Classify a source string without touching the network.
    ///
    /// Anything that does not start with a recognised URL scheme is treated
    /// as a registry-qualified name.
    pub fn classify(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(Error::InvalidReference("empty source".into()));
        }

        Ok(if has_scheme(source, URL_SCHEMES) {
            Self::DirectUrl
        } else {
            Self::Registry
        })
    }
}

fn has_scheme(source: &str, schemes: &[&str]) -> bool {
    schemes.iter().any(|scheme| {
        source
            .get(..scheme.len())
            .map(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .unwrap_or(false)
    })
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectUrl => write!(f, "direct-url"),
            Self::Registry => write!(f, "registry-qualified"),
        }
    }
}

/// Archive format of a direct download, inferred from the URL path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveKind {
    /// Inspect the path portion of a URL. `None` means a plain file.
    pub fn from_source(source: &str) -> Option<Self> {
        let path = source
            .split(['?', '#'])
            .next()
            .unwrap_or(source)
            .to_ascii_lowercase();

        if path.ends_with(".zip") {
            Some(Self::Zip)
        } else if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if path.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Suffix used for the staged download file.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Zip => ".zip",
            Self::TarGz => ".tar.gz",
            Self::Tar => ".tar",
        }
    }
}

/// A requested model artifact.
///
/// Construction never fails; validation happens in [`ModelReference::resolve`]
/// so that a bad entry is reported against its own pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelReference {
    source: String,
    category: String,
    name: String,
    extension: Option<String>,
    sha256: Option<String>,
}

impl ModelReference {
    pub fn new(
        source: impl Into<String>,
        category: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into().trim().to_string(),
            category: category.into(),
            name: name.into(),
            extension: None,
            sha256: None,
        }
    }

    /// Override the expected payload extension (without the leading dot).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into().trim_start_matches('.').to_string());
        self
    }

    /// Expect the fetched payload to hash to this hex sha256.
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into().to_ascii_lowercase());
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expected payload extension.
    ///
    /// Without an override, registry pulls look for `.model` files and
    /// direct downloads for `.nemo` checkpoints.
    pub fn extension(&self) -> &str {
        match (&self.extension, SourceKind::classify(&self.source)) {
            (Some(extension), _) => extension.as_str(),
            (None, Ok(SourceKind::Registry)) => defaults::REGISTRY_EXTENSION,
            (None, _) => defaults::EXTENSION,
        }
    }

    pub fn sha256(&self) -> Option<&str> {
        self.sha256.as_deref()
    }

    /// Validate the reference and classify its source.
    pub fn resolve(&self) -> Result<SourceKind> {
        let kind = SourceKind::classify(&self.source)?;
        if kind == SourceKind::DirectUrl && !has_scheme(&self.source, FETCHABLE_SCHEMES) {
            return Err(Error::InvalidReference(format!(
                "unsupported URL scheme in '{}'; only http and https can be downloaded",
                self.source
            )));
        }
        check_component("category", &self.category)?;
        check_component("name", &self.name)?;
        check_component("extension", self.extension())?;
        Ok(kind)
    }

    /// Archive format for direct URLs; registry payloads are never archives.
    pub fn archive_kind(&self) -> Option<ArchiveKind> {
        match SourceKind::classify(&self.source) {
            Ok(SourceKind::DirectUrl) => ArchiveKind::from_source(&self.source),
            _ => None,
        }
    }

    /// Filesystem-safe encoding of the source string.
    pub fn encoded_source(&self) -> String {
        encode_component(&self.source)
    }
}

impl fmt::Display for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.category, self.name, self.source)
    }
}

/// Replace path separators so the string can be used as a single file name.
pub fn encode_component(value: &str) -> String {
    value.replace(['/', '\\'], "_")
}

fn check_component(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidReference(format!("empty {}", field)));
    }
    let single = !value.contains(['/', '\\']) && value != "." && value != "..";
    if !single || Path::new(value).is_absolute() {
        return Err(Error::InvalidReference(format!(
            "{} '{}' is not a single path component",
            field, value
        )));
    }
    Ok(())
}
