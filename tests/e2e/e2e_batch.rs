//! Batch behaviour across several references.

use std::fs;

use bioprovision::{
    FailurePolicy, Manifest, ModelReference, ProvisionOutcome, ProvisionStage, Provisioner,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::fixture::{config, serve, zip_bytes};

async fn mixed_batch(server: &MockServer) -> Vec<ModelReference> {
    let good = serve(server, "/a.zip", zip_bytes(&[("a.nemo", b"a")])).await;
    let later = serve(server, "/c.zip", zip_bytes(&[("c.nemo", b"c")])).await;
    Mock::given(method("GET"))
        .and(path("/b.zip"))
        .respond_with(ResponseTemplate::new(500))
        .mount(server)
        .await;

    vec![
        ModelReference::new(good, "molecule", "a"),
        ModelReference::new(format!("{}/b.zip", server.uri()), "molecule", "b"),
        ModelReference::new(later, "molecule", "c"),
    ]
}

#[tokio::test]
async fn test_halt_on_error_keeps_earlier_artifacts() {
    let server = MockServer::start().await;
    let base = tempfile::tempdir().unwrap();
    let references = mixed_batch(&server).await;

    let provisioner = Provisioner::new(config(base.path()));
    let report = provisioner.provision_all(&references).await;

    assert!(!report.is_success());
    assert_eq!(report.succeeded().count(), 1);
    let failure = report.failed().next().unwrap();
    assert_eq!(failure.name, "b");
    assert_eq!(failure.reached, Some(ProvisionStage::Resolved));
    assert_eq!(report.not_attempted, vec!["c".to_string()]);

    assert_eq!(fs::read(base.path().join("molecule/a/a.nemo")).unwrap(), b"a");
    assert!(!base.path().join("molecule/c").exists());
}

#[tokio::test]
async fn test_keep_going_isolates_failures() {
    let server = MockServer::start().await;
    let base = tempfile::tempdir().unwrap();
    let references = mixed_batch(&server).await;

    let mut config = config(base.path());
    config.failure_policy = FailurePolicy::KeepGoing;
    let provisioner = Provisioner::new(config);
    let report = provisioner.provision_all(&references).await;

    assert_eq!(report.succeeded().count(), 2);
    assert_eq!(report.failed().count(), 1);
    assert!(report.not_attempted.is_empty());
    assert!(base.path().join("molecule/c/c.nemo").is_file());
}

#[tokio::test]
async fn test_skip_existing_avoids_refetch() {
    let server = MockServer::start().await;
    let base = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/model.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes(&[("x.nemo", b"x")])))
        .expect(1)
        .mount(&server)
        .await;
    let reference = ModelReference::new(format!("{}/model.zip", server.uri()), "molecule", "x");

    let mut config = config(base.path());
    config.skip_existing = true;
    let provisioner = Provisioner::new(config);

    provisioner.provision(&reference).await.unwrap();
    let again = provisioner.provision(&reference).await.unwrap();
    assert_eq!(again.outcome, ProvisionOutcome::Skipped);
}

#[tokio::test]
async fn test_manifest_driven_batch() {
    let server = MockServer::start().await;
    let base = tempfile::tempdir().unwrap();
    let default_url = serve(&server, "/default.tar.gz", Vec::new()).await;
    let override_url = serve(
        &server,
        "/geneformer.zip",
        zip_bytes(&[("geneformer/geneformer-10M.nemo", b"gf")]),
    )
    .await;

    let manifest_path = base.path().join("models.json");
    fs::write(
        &manifest_path,
        serde_json::json!({
            "models": [{
                "name": "geneformer",
                "category": "singlecell",
                "source": default_url,
                "source_env": "GENEFORMER_SOURCE"
            }]
        })
        .to_string(),
    )
    .unwrap();

    let config = config(base.path());
    let manifest = Manifest::load(&config.manifest_path()).unwrap();
    let references = manifest.references(|key| {
        (key == "GENEFORMER_SOURCE").then(|| override_url.clone())
    });

    let report = Provisioner::new(config).provision_all(&references).await;
    assert!(report.is_success());
    assert_eq!(
        fs::read(base.path().join("singlecell/geneformer/geneformer.nemo")).unwrap(),
        b"gf"
    );
}
