//! Per-reference provisioning state machine and the batch driver.
//!
//! Each reference moves through
//! RESOLVED -> STAGED -> LOCATED -> PUBLISHED -> RECORDED
//! with no branching and no retries; the first failing stage aborts the rest.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{FailurePolicy, ProvisionConfig};
use crate::error::{Error, Result};
use crate::model::{ModelReference, SourceKind};
use crate::pipeline::digest;
use crate::pipeline::fetch::SourceFetcher;
use crate::pipeline::lock::TargetLock;
use crate::pipeline::publish::{PublishOutcome, Publisher};
use crate::pipeline::staging::StagingArea;
use crate::pipeline::unpack;
use crate::pipeline::version::VersionRecorder;

/// Last stage a reference completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProvisionStage {
    /// Source classified
    Resolved,
    /// Payload fetched into staging
    Staged,
    /// Single payload file identified
    Located,
    /// Target path points at the payload
    Published,
    /// Version marker written
    Recorded,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Staged => write!(f, "STAGED"),
            Self::Located => write!(f, "LOCATED"),
            Self::Published => write!(f, "PUBLISHED"),
            Self::Recorded => write!(f, "RECORDED"),
        }
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisionOutcome {
    Published(PublishOutcome),
    /// Marker and target already present; nothing fetched
    Skipped,
}

/// Result of provisioning one reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub name: String,
    pub source: String,
    pub kind: SourceKind,
    pub target: PathBuf,
    pub marker: PathBuf,
    pub outcome: ProvisionOutcome,
}

/// A reference that did not reach `Recorded`.
#[derive(Debug)]
pub struct ProvisionFailure {
    pub name: String,
    pub source: String,
    /// Last stage completed before the error, if any
    pub reached: Option<ProvisionStage>,
    pub error: Error,
}

impl fmt::Display for ProvisionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reached {
            Some(stage) => write!(f, "{} failed after {}: {}", self.name, stage, self.error),
            None => write!(f, "{} failed: {}", self.name, self.error),
        }
    }
}

/// Outcome of a sequential batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<std::result::Result<ProvisionReport, ProvisionFailure>>,
    /// References not attempted because an earlier one failed
    pub not_attempted: Vec<String>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &ProvisionReport> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ProvisionFailure> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none() && self.not_attempted.is_empty()
    }
}

/// Runs the provisioning pipeline for model references.
pub struct Provisioner {
    config: ProvisionConfig,
    fetcher: SourceFetcher,
    publisher: Publisher,
    recorder: VersionRecorder,
}

impl Provisioner {
    pub fn new(config: ProvisionConfig) -> Self {
        let fetcher = SourceFetcher::new(&config);
        let publisher = Publisher::new(
            config.publish_mode,
            config.conflict_policy,
            config.blob_dir(),
        );
        let recorder = VersionRecorder::new(config.version_dir());

        Self {
            config,
            fetcher,
            publisher,
            recorder,
        }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    pub fn recorder(&self) -> &VersionRecorder {
        &self.recorder
    }

    /// Provision a single reference.
    pub async fn provision(&self, reference: &ModelReference) -> Result<ProvisionReport> {
        let mut reached = None;
        self.run(reference, &mut reached).await
    }

    /// Provision references in order.
    ///
    /// With [`FailurePolicy::HaltOnError`] the batch stops at the first
    /// failure; artifacts already published stay in place.
    pub async fn provision_all(&self, references: &[ModelReference]) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, reference) in references.iter().enumerate() {
            let mut reached = None;
            match self.run(reference, &mut reached).await {
                Ok(done) => report.results.push(Ok(done)),
                Err(error) => {
                    let failure = ProvisionFailure {
                        name: reference.name().to_string(),
                        source: reference.source().to_string(),
                        reached,
                        error,
                    };
                    log::error!("{}", failure);
                    report.results.push(Err(failure));

                    if self.config.failure_policy == FailurePolicy::HaltOnError {
                        report.not_attempted = references[index + 1..]
                            .iter()
                            .map(|r| r.name().to_string())
                            .collect();
                        break;
                    }
                }
            }
        }

        report
    }

    async fn run(
        &self,
        reference: &ModelReference,
        reached: &mut Option<ProvisionStage>,
    ) -> Result<ProvisionReport> {
        let kind = reference.resolve()?;
        self.advance(reference, reached, ProvisionStage::Resolved);
        self.recorder.check_name(reference.source())?;

        let target = self.config.target_path(reference);
        let marker = self.recorder.marker_path(reference.source());

        if self.config.skip_existing && self.recorder.is_recorded(reference.source()) && target.is_file() {
            log::info!("{} already provisioned at {:?}; skipping", reference.name(), target);
            return Ok(ProvisionReport {
                name: reference.name().to_string(),
                source: reference.source().to_string(),
                kind,
                target,
                marker,
                outcome: ProvisionOutcome::Skipped,
            });
        }

        let staging = StagingArea::create(&self.config.staging_root(), reference.name())?;
        let fetched = self.fetcher.fetch(kind, reference, &staging).await?;
        self.advance(reference, reached, ProvisionStage::Staged);

        let payload = unpack::locate(
            &fetched,
            &staging,
            reference.extension(),
            self.config.tie_break,
        )?;
        if kind == SourceKind::Registry {
            if let Some(expected) = reference.sha256() {
                digest::verify(expected, &digest::sha256_file(&payload)?)?;
            }
        }
        self.advance(reference, reached, ProvisionStage::Located);

        let lock_key = self.config.lock_key(reference);
        let lock = TargetLock::acquire(&self.config.lock_dir(), &lock_key).await?;
        let artifact = self.publisher.publish(&payload, &target, reference.source())?;
        self.advance(reference, reached, ProvisionStage::Published);

        let recorded = self.recorder.record(reference.source())?;
        self.advance(reference, reached, ProvisionStage::Recorded);
        drop(lock);

        staging.close();

        Ok(ProvisionReport {
            name: reference.name().to_string(),
            source: reference.source().to_string(),
            kind,
            target: artifact.target,
            marker: recorded.path,
            outcome: ProvisionOutcome::Published(artifact.outcome),
        })
    }

    fn advance(
        &self,
        reference: &ModelReference,
        reached: &mut Option<ProvisionStage>,
        stage: ProvisionStage,
    ) {
        log::debug!("{} -> {}", reference.name(), stage);
        *reached = Some(stage);
    }
}
