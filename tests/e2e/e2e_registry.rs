//! Registry-qualified provisioning with a stand-in registry client.
#![cfg(unix)]

use std::fs;

use bioprovision::{Error, ModelReference, ProvisionStage, Provisioner, SourceKind};

use crate::fixture::{config, marker_for, staging_is_clean, FakeRegistry};

const SOURCE: &str = "nvidia/clara/esm2nv650m:1.0";

#[tokio::test]
async fn test_registry_payload_published() {
    let base = tempfile::tempdir().unwrap();
    let tools = tempfile::tempdir().unwrap();
    let registry = FakeRegistry::new(tools.path(), &["esm2nv650m.model"]);

    let mut config = config(base.path());
    config.registry_api_key = Some("nvapi-test".into());
    registry.configure(&mut config);

    let provisioner = Provisioner::new(config);
    let reference = ModelReference::new(SOURCE, "protein", "esm2nv650m").with_extension("model");
    let report = provisioner.provision(&reference).await.unwrap();

    assert_eq!(report.kind, SourceKind::Registry);
    let target = base.path().join("protein/esm2nv650m/esm2nv650m.model");
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        format!("weights for {}", SOURCE)
    );
    assert!(base
        .path()
        .join("version/nvidia_clara_esm2nv650m:1.0.version")
        .is_file());
    assert_eq!(registry.call_count(), 1);
    assert!(staging_is_clean(base.path()));
}

#[tokio::test]
async fn test_missing_credential_still_attempts_pull() {
    let base = tempfile::tempdir().unwrap();
    let tools = tempfile::tempdir().unwrap();
    let registry = FakeRegistry::new(tools.path(), &["esm2nv650m.model"]);

    let mut config = config(base.path());
    config.registry_api_key = None;
    registry.configure(&mut config);

    let provisioner = Provisioner::new(config);
    let reference = ModelReference::new(SOURCE, "protein", "esm2nv650m").with_extension("model");
    let result = provisioner.provision(&reference).await;

    match result {
        Err(Error::DownloadFailed { reference, reason }) => {
            assert_eq!(reference, SOURCE);
            assert!(reason.contains("invalid apikey"), "{}", reason);
        }
        other => panic!("expected DownloadFailed, got {:?}", other),
    }
    assert_eq!(registry.call_count(), 1);
    assert!(!marker_for(base.path(), SOURCE).exists());
    assert!(staging_is_clean(base.path()));
}

#[tokio::test]
async fn test_placeholder_credential_is_passed_through() {
    let base = tempfile::tempdir().unwrap();
    let tools = tempfile::tempdir().unwrap();
    let registry = FakeRegistry::new(tools.path(), &["model.model"]);

    let mut config = config(base.path());
    config.registry_api_key = Some("<YOUR_API_KEY>".into());
    registry.configure(&mut config);

    // The stand-in accepts any non-empty key, so the warning does not block the pull.
    let provisioner = Provisioner::new(config);
    let reference = ModelReference::new(SOURCE, "protein", "esm2").with_extension("model");
    provisioner.provision(&reference).await.unwrap();
    assert_eq!(registry.call_count(), 1);
}

#[tokio::test]
async fn test_registry_multiple_payloads_is_ambiguous() {
    let base = tempfile::tempdir().unwrap();
    let tools = tempfile::tempdir().unwrap();
    let registry = FakeRegistry::new(tools.path(), &["a.model", "b.model"]);

    let mut config = config(base.path());
    config.registry_api_key = Some("nvapi-test".into());
    registry.configure(&mut config);

    let provisioner = Provisioner::new(config);
    let reference = ModelReference::new(SOURCE, "protein", "esm2").with_extension("model");
    let report = provisioner.provision_all(std::slice::from_ref(&reference)).await;

    let failure = report.failed().next().unwrap();
    assert!(matches!(failure.error, Error::AmbiguousArchiveContents { .. }));
    assert_eq!(failure.reached, Some(ProvisionStage::Staged));
    assert!(!base.path().join("protein/esm2/esm2.model").exists());
}

#[tokio::test]
async fn test_registry_checksum_verified_on_payload() {
    let base = tempfile::tempdir().unwrap();
    let tools = tempfile::tempdir().unwrap();
    let registry = FakeRegistry::new(tools.path(), &["esm2.model"]);

    let mut config = config(base.path());
    config.registry_api_key = Some("nvapi-test".into());
    registry.configure(&mut config);

    let provisioner = Provisioner::new(config);
    let reference = ModelReference::new(SOURCE, "protein", "esm2")
        .with_extension("model")
        .with_sha256("ff".repeat(32));
    let result = provisioner.provision(&reference).await;

    assert!(matches!(result, Err(Error::Integrity { .. })));
    assert!(!base.path().join("protein/esm2/esm2.model").exists());
}
