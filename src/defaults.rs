//! Default values for provisioning configuration.

use std::path::PathBuf;

pub const EXTENSION: &str = "nemo";
pub const REGISTRY_EXTENSION: &str = "model";
pub const SUBPATH_TEMPLATE: &str = "{category}/{name}/{name}.{ext}";
pub const REGISTRY_PROGRAM: &str = "ngc";
pub const REGISTRY_ARGS: &[&str] = &[
    "registry",
    "model",
    "download-version",
    "{source}",
    "--dest",
    "{dest}",
];
pub const REGISTRY_API_KEY_ENV: &str = "NGC_CLI_API_KEY";
pub const MAX_ATTEMPTS: u32 = 1;
pub const REQUEST_TIMEOUT_SECS: u64 = 600;

pub const VERSION_DIR: &str = "version";
pub const VERSION_SUFFIX: &str = "version";
pub const STAGING_DIR: &str = ".staging";
pub const LOCK_DIR: &str = ".locks";
pub const BLOB_DIR: &str = ".blobs";
pub const MANIFEST_FILE: &str = "models.json";

/// Credentials shipped in sample environment files that are never valid.
pub const PLACEHOLDER_API_KEYS: &[&str] = &["<YOUR_API_KEY>", "YOUR_API_KEY", "<api-key>", "changeme"];

pub fn base_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("bioprovision")
        .join("models")
}
