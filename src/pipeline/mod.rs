//! The artifact provisioning pipeline.
//!
//! This module provides:
//! - Per-reference scratch directories (`staging`)
//! - HTTP and registry transports (`fetch`)
//! - Archive extraction and payload selection (`unpack`)
//! - Atomic publication (`publish`) under a per-target lock (`lock`)
//! - Version markers (`version`)
//! - The stage machine and batch driver (`provisioner`)

pub mod digest;
pub mod fetch;
pub mod lock;
pub mod provisioner;
pub mod publish;
pub mod staging;
pub mod unpack;
pub mod version;

pub use fetch::{Fetched, HttpFetcher, PayloadLayout, RegistryFetcher, SourceFetcher};
pub use provisioner::{
    BatchReport, ProvisionFailure, ProvisionOutcome, ProvisionReport, ProvisionStage, Provisioner,
};
pub use publish::{PublishOutcome, PublishedArtifact, Publisher};
pub use staging::StagingArea;
pub use version::{VersionMarker, VersionRecorder};
