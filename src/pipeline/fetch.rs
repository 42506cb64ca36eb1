//! Artifact fetching into a staging area.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::ProvisionConfig;
use crate::defaults;
use crate::error::{Error, Result};
use crate::model::{ArchiveKind, ModelReference, SourceKind};
use crate::pipeline::digest;
use crate::pipeline::staging::StagingArea;

const DOWNLOAD_FILE: &str = "download";
const REGISTRY_DIR: &str = "registry";
const STDERR_TAIL_LINES: usize = 5;

/// Shape of what a fetch left in staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLayout {
    /// A single downloaded file that is itself the model
    File,
    /// A downloaded archive that still needs extraction
    Archive(ArchiveKind),
    /// A directory tree written by the registry client
    Directory,
}

/// A populated staging payload.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub path: PathBuf,
    pub layout: PayloadLayout,
}

/// Downloads direct URLs over HTTP.
pub struct HttpFetcher {
    client: Client,
    max_attempts: u32,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Download the reference into `download[.suffix]` inside staging.
    pub async fn fetch(&self, reference: &ModelReference, staging: &StagingArea) -> Result<Fetched> {
        let archive = reference.archive_kind();
        let file_name = match archive {
            Some(kind) => format!("{}{}", DOWNLOAD_FILE, kind.suffix()),
            None => DOWNLOAD_FILE.to_string(),
        };
        let dest = staging.path().join(file_name);

        log::info!("Downloading {}", reference.source());
        let actual = self.download_with_retry(reference.source(), &dest).await?;

        if let Some(expected) = reference.sha256() {
            digest::verify(expected, &actual)?;
        }

        Ok(Fetched {
            path: dest,
            layout: archive.map(PayloadLayout::Archive).unwrap_or(PayloadLayout::File),
        })
    }

    async fn download_with_retry(&self, url: &str, dest: &Path) -> Result<String> {
        for attempt in 1..=self.max_attempts {
            match self.download_file(url, dest).await {
                Ok(sha256) => return Ok(sha256),
                Err(e) => {
                    if attempt == self.max_attempts {
                        return Err(e);
                    }
                    log::warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                }
            }
        }

        Err(Error::download(url, "no download attempts configured"))
    }

    /// Stream the body to `dest`, returning its hex sha256.
    async fn download_file(&self, url: &str, dest: &Path) -> Result<String> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::download(url, e))?;

        if !response.status().is_success() {
            return Err(Error::download(url, format!("HTTP {}", response.status())));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| Error::download(url, e))? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(::hex::encode(hasher.finalize()))
    }
}

/// Pulls registry-qualified names with an external registry CLI.
pub struct RegistryFetcher {
    program: String,
    args: Vec<String>,
    api_key: Option<String>,
}

impl RegistryFetcher {
    pub fn new(program: impl Into<String>, args: Vec<String>, api_key: Option<String>) -> Self {
        Self {
            program: program.into(),
            args,
            api_key,
        }
    }

    /// Whether the configured credential looks usable.
    pub fn has_credential(&self) -> bool {
        match self.api_key.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(key) => !defaults::PLACEHOLDER_API_KEYS
                .iter()
                .any(|placeholder| placeholder.eq_ignore_ascii_case(key)),
        }
    }

    /// Run the registry client with its destination inside staging.
    ///
    /// A missing credential only produces a warning; the pull is still
    /// attempted and fails with `DownloadFailed` if the registry refuses it.
    pub async fn fetch(&self, reference: &ModelReference, staging: &StagingArea) -> Result<Fetched> {
        let dest = staging.path().join(REGISTRY_DIR);
        std::fs::create_dir_all(&dest)?;

        if !self.has_credential() {
            log::warn!(
                "{} is not set or is a placeholder; registry pull of '{}' may fail",
                defaults::REGISTRY_API_KEY_ENV,
                reference.source()
            );
        }

        let dest_str = dest.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{source}", reference.source())
                    .replace("{dest}", &dest_str)
            })
            .collect();

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        match &self.api_key {
            Some(key) => command.env(defaults::REGISTRY_API_KEY_ENV, key),
            None => command.env_remove(defaults::REGISTRY_API_KEY_ENV),
        };

        log::info!("Pulling {} with {}", reference.source(), self.program);
        let output = command.output().await.map_err(|e| {
            Error::download(
                reference.source(),
                format!("failed to run {}: {}", self.program, e),
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(Error::download(
                reference.source(),
                format!("{} exited with {}: {}", self.program, output.status, tail.trim()),
            ));
        }

        Ok(Fetched {
            path: dest,
            layout: PayloadLayout::Directory,
        })
    }
}

/// Dispatches a classified reference to the matching transport.
pub struct SourceFetcher {
    http: HttpFetcher,
    registry: RegistryFetcher,
}

impl SourceFetcher {
    pub fn new(config: &ProvisionConfig) -> Self {
        Self {
            http: HttpFetcher::new(config.request_timeout, config.max_attempts),
            registry: RegistryFetcher::new(
                config.registry_program.clone(),
                config.registry_args.clone(),
                config.registry_api_key.clone(),
            ),
        }
    }

    pub async fn fetch(
        &self,
        kind: SourceKind,
        reference: &ModelReference,
        staging: &StagingArea,
    ) -> Result<Fetched> {
        match kind {
            SourceKind::DirectUrl => self.http.fetch(reference, staging).await,
            SourceKind::Registry => self.registry.fetch(reference, staging).await,
        }
    }
}
