//! Provisioning configuration and the model manifest.
//!
//! Every pipeline stage receives its settings from [`ProvisionConfig`]; the
//! process environment is only read once, in [`ProvisionConfig::from_env`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};
use crate::model::{encode_component, ModelReference};

/// How a located payload is made visible at its target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Rename the payload over the target
    #[default]
    Move,
    /// Store the payload under `.blobs/` and link the target to it
    Symlink,
}

/// What to do when the target already holds different content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Overwrite,
    Refuse,
}

/// Selection rule when staging yields more than one payload candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Fail with `AmbiguousArchiveContents`
    #[default]
    Reject,
    /// Pick the lexicographically smallest relative path
    LexicographicFirst,
}

/// Batch behaviour after a reference fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    HaltOnError,
    KeepGoing,
}

impl FromStr for PublishMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "move" => Ok(Self::Move),
            "symlink" | "link" => Ok(Self::Symlink),
            other => Err(Error::Config(format!("unknown publish mode '{}'", other))),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "refuse" | "error" => Ok(Self::Refuse),
            other => Err(Error::Config(format!("unknown conflict policy '{}'", other))),
        }
    }
}

impl FromStr for TieBreak {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "first" | "lexicographic" | "lexicographic_first" => Ok(Self::LexicographicFirst),
            other => Err(Error::Config(format!("unknown tie-break rule '{}'", other))),
        }
    }
}

/// Output path template relative to the base directory.
///
/// Supports `{category}`, `{name}` and `{ext}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubpathTemplate(String);

impl SubpathTemplate {
    const PLACEHOLDERS: [&'static str; 3] = ["category", "name", "ext"];

    pub fn parse(template: &str) -> Result<Self> {
        let template = template.trim();
        if template.is_empty() || Path::new(template).is_absolute() {
            return Err(Error::Config(format!(
                "subpath template '{}' must be a non-empty relative path",
                template
            )));
        }

        let mut rest = template;
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                Error::Config(format!("unclosed placeholder in '{}'", template))
            })?;
            let key = &after[..close];
            if !Self::PLACEHOLDERS.contains(&key) {
                return Err(Error::Config(format!(
                    "unknown placeholder '{{{}}}' in '{}'",
                    key, template
                )));
            }
            rest = &after[close + 1..];
        }

        if template.split('/').any(|part| part == "..") {
            return Err(Error::Config(format!(
                "subpath template '{}' must not leave the base directory",
                template
            )));
        }

        Ok(Self(template.to_string()))
    }

    pub fn render(&self, reference: &ModelReference) -> PathBuf {
        PathBuf::from(
            self.0
                .replace("{category}", reference.category())
                .replace("{name}", reference.name())
                .replace("{ext}", reference.extension()),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubpathTemplate {
    fn default() -> Self {
        Self(defaults::SUBPATH_TEMPLATE.to_string())
    }
}

/// Settings shared by every stage of the pipeline.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub base_dir: PathBuf,
    pub registry_api_key: Option<String>,
    pub registry_program: String,
    pub registry_args: Vec<String>,
    pub subpath_template: SubpathTemplate,
    pub manifest_path: Option<PathBuf>,
    pub publish_mode: PublishMode,
    pub conflict_policy: ConflictPolicy,
    pub tie_break: TieBreak,
    pub failure_policy: FailurePolicy,
    pub skip_existing: bool,
    pub max_attempts: u32,
    pub request_timeout: Duration,
}

impl ProvisionConfig {
    /// Create a configuration with defaults rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            registry_api_key: None,
            registry_program: defaults::REGISTRY_PROGRAM.to_string(),
            registry_args: defaults::REGISTRY_ARGS.iter().map(|s| s.to_string()).collect(),
            subpath_template: SubpathTemplate::default(),
            manifest_path: None,
            publish_mode: PublishMode::default(),
            conflict_policy: ConflictPolicy::default(),
            tie_break: TieBreak::default(),
            failure_policy: FailurePolicy::default(),
            skip_existing: false,
            max_attempts: defaults::MAX_ATTEMPTS,
            request_timeout: Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS),
        }
    }

    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// Recognised variables:
    /// - `BIOPROVISION_BASE_DIR` (falls back to `MODEL_PATH`)
    /// - `NGC_CLI_API_KEY`
    /// - `BIOPROVISION_REGISTRY_CLI`
    /// - `BIOPROVISION_SUBPATH_TEMPLATE`
    /// - `BIOPROVISION_MANIFEST`
    /// - `BIOPROVISION_PUBLISH_MODE` (`move` | `symlink`)
    /// - `BIOPROVISION_ON_CONFLICT` (`overwrite` | `refuse`)
    /// - `BIOPROVISION_TIE_BREAK` (`reject` | `first`)
    /// - `BIOPROVISION_KEEP_GOING`, `BIOPROVISION_SKIP_EXISTING` (booleans)
    /// - `BIOPROVISION_MAX_ATTEMPTS`, `BIOPROVISION_TIMEOUT_SECS`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_dir = get("BIOPROVISION_BASE_DIR")
            .or_else(|| get("MODEL_PATH"))
            .map(PathBuf::from)
            .unwrap_or_else(defaults::base_dir);

        let mut config = Self::new(base_dir);
        config.registry_api_key = lookup(defaults::REGISTRY_API_KEY_ENV);

        if let Some(program) = get("BIOPROVISION_REGISTRY_CLI") {
            config.registry_program = program;
        }
        if let Some(template) = get("BIOPROVISION_SUBPATH_TEMPLATE") {
            config.subpath_template = SubpathTemplate::parse(&template)?;
        }
        config.manifest_path = get("BIOPROVISION_MANIFEST").map(PathBuf::from);
        if let Some(mode) = get("BIOPROVISION_PUBLISH_MODE") {
            config.publish_mode = mode.parse()?;
        }
        if let Some(policy) = get("BIOPROVISION_ON_CONFLICT") {
            config.conflict_policy = policy.parse()?;
        }
        if let Some(rule) = get("BIOPROVISION_TIE_BREAK") {
            config.tie_break = rule.parse()?;
        }
        if let Some(flag) = get("BIOPROVISION_KEEP_GOING") {
            if parse_bool("BIOPROVISION_KEEP_GOING", &flag)? {
                config.failure_policy = FailurePolicy::KeepGoing;
            }
        }
        if let Some(flag) = get("BIOPROVISION_SKIP_EXISTING") {
            config.skip_existing = parse_bool("BIOPROVISION_SKIP_EXISTING", &flag)?;
        }
        if let Some(attempts) = get("BIOPROVISION_MAX_ATTEMPTS") {
            config.max_attempts = parse_number("BIOPROVISION_MAX_ATTEMPTS", &attempts)?;
            if config.max_attempts == 0 {
                return Err(Error::Config("BIOPROVISION_MAX_ATTEMPTS must be at least 1".into()));
            }
        }
        if let Some(secs) = get("BIOPROVISION_TIMEOUT_SECS") {
            config.request_timeout =
                Duration::from_secs(parse_number("BIOPROVISION_TIMEOUT_SECS", &secs)?);
        }

        Ok(config)
    }

    /// Final location of a reference's published artifact.
    pub fn target_path(&self, reference: &ModelReference) -> PathBuf {
        self.base_dir.join(self.subpath_template.render(reference))
    }

    /// Manifest location, defaulting to `<base>/models.json`.
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| self.base_dir.join(defaults::MANIFEST_FILE))
    }

    pub fn version_dir(&self) -> PathBuf {
        self.base_dir.join(defaults::VERSION_DIR)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.base_dir.join(defaults::STAGING_DIR)
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.base_dir.join(defaults::LOCK_DIR)
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.base_dir.join(defaults::BLOB_DIR)
    }

    /// Lock file name for a reference's target.
    pub fn lock_key(&self, reference: &ModelReference) -> String {
        encode_component(&self.subpath_template.render(reference).to_string_lossy())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{}: expected a boolean, got '{}'", key, other))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}: expected a number, got '{}'", key, value)))
}

/// JSON list of models to provision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub models: Vec<ManifestEntry>,
}

/// One model in the manifest.
///
/// `source_env` names an environment variable holding the source; `source`
/// is used when that variable is unset or empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read manifest {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(Error::from)
    }

    /// Turn entries into references, reading `source_env` through `lookup`.
    ///
    /// An entry with no usable source yields a reference with an empty
    /// source, which fails with `InvalidReference` when provisioned.
    pub fn references<F>(&self, lookup: F) -> Vec<ModelReference>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.models
            .iter()
            .map(|entry| {
                let source = entry
                    .source_env
                    .as_deref()
                    .and_then(&lookup)
                    .filter(|s| !s.trim().is_empty())
                    .or_else(|| entry.source.clone())
                    .unwrap_or_default();

                let mut reference =
                    ModelReference::new(source, entry.category.clone(), entry.name.clone());
                if let Some(ext) = &entry.extension {
                    reference = reference.with_extension(ext.clone());
                }
                if let Some(sha) = &entry.sha256 {
                    reference = reference.with_sha256(sha.clone());
                }
                reference
            })
            .collect()
    }
}
