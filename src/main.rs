//! Provision every model listed in the manifest.
//!
//! Takes no arguments; see `ProvisionConfig::from_lookup` for the
//! environment variables it reads.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use bioprovision::{Manifest, ProvisionConfig, ProvisionOutcome, Provisioner};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> bioprovision::Result<bool> {
    let config = ProvisionConfig::from_env()?;
    let manifest_path = config.manifest_path();
    let manifest = Manifest::load(&manifest_path)?;
    let references = manifest.references(|key| std::env::var(key).ok());

    log::info!(
        "bioprovision {}: {} models from {:?} into {:?}",
        bioprovision::VERSION,
        references.len(),
        manifest_path,
        config.base_dir
    );

    let provisioner = Provisioner::new(config);
    let report = provisioner.provision_all(&references).await;

    for done in report.succeeded() {
        match done.outcome {
            ProvisionOutcome::Published(outcome) => {
                log::info!("{}: {} at {:?}", done.name, outcome, done.target)
            }
            ProvisionOutcome::Skipped => log::info!("{}: skipped", done.name),
        }
    }
    let failed = report.failed().count();
    if failed > 0 {
        log::error!("{} of {} models failed", failed, references.len());
    }
    if !report.not_attempted.is_empty() {
        log::warn!("Not attempted: {}", report.not_attempted.join(", "));
    }

    Ok(report.is_success())
}
