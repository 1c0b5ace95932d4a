//! Integration tests for the diagnostics bundle.

mod common;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use svc_orchestrator::PlanState;
use svc_testing::FakeCluster;

use common::{cassandra, foldered_cassandra, setup};

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_bundle_writes_every_file() {
    let svc = cassandra();
    let (fake, ctx) = setup(
        FakeCluster::new()
            .with_converge_polls(0)
            .with_plan("deploy", vec![PlanState::Complete]),
    );
    ctx.installer()
        .install(&svc, Some("2.0.0"), 3, &json!({ "nodes": { "count": 3 } }))
        .await
        .unwrap();
    let base = tempfile::tempdir().unwrap();

    let report = ctx.bundle(&svc).create(base.path()).await.unwrap();

    assert!(report.is_complete());
    assert!(report.directory.starts_with(base.path()));
    let dir_name = report.directory.file_name().unwrap().to_string_lossy();
    assert!(dir_name.starts_with("cassandra_cassandra_"));

    let mut names: Vec<String> = report
        .files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "service_configuration.json",
            "service_deployment.json",
            "service_plan_status_deploy.json",
            "service_pod_status.json",
        ]
    );

    let configuration = read_json(&report.directory.join("service_configuration.json"));
    assert_eq!(Some(configuration), fake.installed_options(&svc.name));
    let deployment = read_json(&report.directory.join("service_deployment.json"));
    assert_eq!(deployment["version"], "2.0.0");

    let raw = std::fs::read_to_string(report.directory.join("service_pod_status.json")).unwrap();
    assert!(raw.ends_with("}\n"));
    assert!(raw.contains("\n  \""));
}

#[tokio::test]
async fn test_bundle_of_absent_service_is_partial() {
    let (_fake, ctx) = setup(FakeCluster::new());
    let base = tempfile::tempdir().unwrap();

    let report = ctx.bundle(&cassandra()).create(base.path()).await.unwrap();

    assert!(!report.is_complete());
    let failed: Vec<&str> = report.failures.iter().map(|(f, _)| f.as_str()).collect();
    assert_eq!(
        failed,
        vec!["service_configuration.json", "service_pod_status.json"]
    );
    assert!(report.failures.iter().all(|(_, e)| e.is_not_found()));

    // An absent deployment is still recorded.
    let deployment = read_json(&report.directory.join("service_deployment.json"));
    assert_eq!(deployment, Value::Null);
}

#[tokio::test]
async fn test_bundle_without_plans() {
    let svc = cassandra();
    let (_fake, ctx) = setup(FakeCluster::new().with_installed(&svc, "1.0.0"));
    let base = tempfile::tempdir().unwrap();

    let report = ctx.bundle(&svc).create(base.path()).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.files.len(), 3);
}

#[test]
fn test_directory_name() {
    let (_fake, ctx) = setup(FakeCluster::new());
    let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();

    assert_eq!(
        ctx.bundle(&cassandra()).directory_name(at),
        "cassandra_cassandra_20260304050607"
    );
    assert_eq!(
        ctx.bundle(&foldered_cassandra()).directory_name(at),
        "cassandra_test_integration_cassandra_20260304050607"
    );
}
