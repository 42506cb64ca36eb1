//! bioprovision - fetch, unpack and publish trained biological model artifacts.

mod defaults;
pub mod error;

pub mod config;
pub mod model;
pub mod pipeline;

pub use error::{Error, Result};

pub use config::{
    ConflictPolicy, FailurePolicy, Manifest, ManifestEntry, ProvisionConfig, PublishMode,
    SubpathTemplate, TieBreak,
};
pub use model::{ArchiveKind, ModelReference, SourceKind};
pub use pipeline::{
    BatchReport, ProvisionFailure, ProvisionOutcome, ProvisionReport, ProvisionStage, Provisioner,
    PublishOutcome, PublishedArtifact, VersionMarker, VersionRecorder,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
