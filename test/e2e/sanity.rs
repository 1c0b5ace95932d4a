//! Sanity scenario for a clustered database service.
//!
//! One fixture (fixture jobs, clean reinstall through an upgrade, teardown)
//! wraps three checks:
//!
//! 1. The `native-client` endpoint is sanitized and points at node 0
//! 2. `cleanup` then `repair` complete while test data is written and later
//!    deleted by jobs
//! 3. Node 0 emits the expected metrics (platform versions 1.9 up to 1.12)
//!
//! A failed check writes a diagnostics bundle before teardown removes the
//! service.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p svc-e2e --test sanity
//!
//! # Against a live cluster
//! SVC_API_URL=https://cluster.example.com SVC_AUTH_TOKEN=... \
//!     cargo test -p svc-e2e --test sanity -- --ignored
//! ```

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context};
use semver::Version;
use serde_json::json;
use svc_orchestrator::control::PlanParameters;
use svc_orchestrator::metrics::{check_metrics_presence, MetricSample};
use svc_orchestrator::{
    Harness, Job, JobKind, JobName, OrchestratorConfig, OrchestratorContext, PlanName, PlanState,
    PodName, Requirement, ScenarioConfig, ScenarioError, ScenarioOutcome, ServiceRef, TaskName,
    UpgradeOptions,
};
use svc_testing::{test_config, Event, FakeCluster};
use tracing::{info, warn};

const PACKAGE: &str = "cassandra";
const FOLDER: &str = "/test/integration";
const TASK_COUNT: usize = 3;
const NATIVE_PORT: u16 = 9042;
const BASELINE_VERSION: &str = "2.3.0-3.0.16";
const TARGET_VERSION: &str = "2.4.0-3.0.16";

const EXPECTED_METRICS: [&str; 3] = [
    "org.apache.cassandra.metrics.Table.CoordinatorReadLatency.system.hints.p999",
    "org.apache.cassandra.metrics.Table.CompressionRatio.system_schema.indexes",
    "org.apache.cassandra.metrics.ThreadPools.ActiveTasks.internal.MemtableReclaimMemory",
];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,svc_orchestrator=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn service() -> ServiceRef {
    ServiceRef::foldered(PACKAGE, FOLDER, PACKAGE).unwrap()
}

fn node_address(config: &OrchestratorConfig) -> String {
    config
        .host_naming()
        .autoip_host(&service().name, "node-0-server", NATIVE_PORT)
}

fn keyspace() -> PlanParameters {
    PlanParameters::from([("CASSANDRA_KEYSPACE".to_string(), "testspace1".to_string())])
}

fn data_job(name: &str, kind: JobKind, target: &str) -> Job {
    Job::new(JobName::parse(name).unwrap(), kind, target)
        .with_parameter("CASSANDRA_KEYSPACE", "testspace1")
}

fn before_jobs(target: &str) -> Vec<Job> {
    vec![
        data_job("write-data", JobKind::Write, target),
        data_job("verify-data", JobKind::Verify, target),
    ]
}

fn after_jobs(target: &str) -> Vec<Job> {
    vec![
        data_job("delete-data", JobKind::Delete, target),
        data_job("verify-deletion", JobKind::VerifyDeletion, target),
    ]
}

fn metrics_requirements() -> Vec<Requirement> {
    vec![
        Requirement::MinPlatformVersion(Version::new(1, 9, 0)),
        Requirement::BelowPlatformVersion(Version::new(1, 12, 0)),
    ]
}

/// Which checks ran.
#[derive(Debug, Default, PartialEq, Eq)]
struct SanityReport {
    endpoints: bool,
    plans: bool,
    metrics: bool,
}

async fn check_endpoints(ctx: &OrchestratorContext) -> anyhow::Result<()> {
    let svc = service();
    let endpoint = ctx.endpoints().get_endpoint(&svc, "native-client").await?;
    let expected = ctx
        .hosts()
        .autoip_host(&svc.name, "node-0-server", NATIVE_PORT);

    ensure!(
        endpoint.dns().first() == Some(&expected.as_str()),
        "native-client dns {:?} does not start with {expected}",
        endpoint.dns()
    );
    ensure!(
        !endpoint.contains_key("vip"),
        "native-client endpoint exposes a vip"
    );
    Ok(())
}

async fn check_repair_cleanup(ctx: &OrchestratorContext) -> anyhow::Result<()> {
    let svc = service();
    let target = node_address(ctx.config());
    let plans = ctx.plans();
    let parameters = keyspace();

    ctx.jobs()
        .run_context(&before_jobs(&target), &after_jobs(&target), || async {
            for name in ["cleanup", "repair"] {
                let plan = PlanName::parse(name)?;
                plans.run(&svc, &plan, &parameters, None).await?;
            }
            Ok(())
        })
        .await?;
    Ok(())
}

/// Returns false when the platform is outside the supported range.
async fn check_metrics(ctx: &OrchestratorContext) -> anyhow::Result<bool> {
    let platform = ctx.control().platform_info().await?;
    if let Some(reason) = metrics_requirements()
        .iter()
        .find_map(|r| r.unmet_reason(&platform))
    {
        info!(%reason, "Skipping metrics check");
        return Ok(false);
    }

    ctx.metrics()
        .wait_for_metrics(
            &service(),
            &PodName::parse("node-0")?,
            &TaskName::parse("node-0-server")?,
            ctx.config().metrics_timeout,
            |emitted| check_metrics_presence(emitted, &EXPECTED_METRICS),
        )
        .await?;
    Ok(true)
}

async fn run_checks(ctx: &OrchestratorContext) -> anyhow::Result<SanityReport> {
    let mut report = SanityReport::default();

    check_endpoints(ctx).await.context("endpoints")?;
    report.endpoints = true;

    check_repair_cleanup(ctx)
        .await
        .context("repair and cleanup plans")?;
    report.plans = true;

    report.metrics = check_metrics(ctx).await.context("metrics")?;
    Ok(report)
}

/// Run the sanity scenario, bundling diagnostics under `bundle_base` on failure.
async fn run_sanity(
    ctx: OrchestratorContext,
    bundle_base: &Path,
) -> Result<ScenarioOutcome<SanityReport>, ScenarioError> {
    let svc = service();
    let config = ScenarioConfig::new(
        svc.clone(),
        TASK_COUNT,
        UpgradeOptions::to(TARGET_VERSION).from(BASELINE_VERSION),
    )
    .with_jobs(
        before_jobs(&node_address(ctx.config()))
            .into_iter()
            .chain(after_jobs(&node_address(ctx.config()))),
    );

    Harness::new(ctx, config)
        .run(|ctx| async move {
            let outcome = run_checks(&ctx).await;
            if let Err(e) = &outcome {
                warn!(error = %e, "Sanity check failed, collecting diagnostics");
                if let Err(bundle_err) = ctx.bundle(&svc).create(bundle_base).await {
                    warn!(error = %bundle_err, "Diagnostics bundle failed");
                }
            }
            outcome
        })
        .await
}

fn completing() -> Vec<PlanState> {
    vec![PlanState::Started, PlanState::InProgress, PlanState::Complete]
}

/// A fake cluster that behaves like a healthy deployment of the service.
fn healthy_cluster(platform_version: &str) -> FakeCluster {
    let naming = test_config().host_naming();
    let svc = service();
    let dns: Vec<String> = (0..TASK_COUNT)
        .map(|i| naming.autoip_host(&svc.name, &format!("node-{i}-server"), NATIVE_PORT))
        .collect();
    let samples: Vec<Vec<MetricSample>> = EXPECTED_METRICS
        .iter()
        .map(|name| vec![MetricSample::new(*name, 0.0)])
        .collect();

    FakeCluster::new()
        .with_platform_version(platform_version)
        .with_default_version(BASELINE_VERSION)
        .with_plan("cleanup", completing())
        .with_plan("repair", completing())
        .with_exclusive_plans()
        .with_endpoint(
            "native-client",
            json!({
                "address": ["10.0.1.10:9042", "10.0.1.11:9042", "10.0.1.12:9042"],
                "dns": dns,
                "vip": ""
            }),
        )
        .with_metric_batches(
            &PodName::parse("node-0").unwrap(),
            &TaskName::parse("node-0-server").unwrap(),
            samples,
        )
}

fn bundle_base() -> PathBuf {
    std::env::var_os("SVC_E2E_BUNDLE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("svc-e2e-bundles"))
}

#[tokio::test(start_paused = true)]
async fn test_sanity_on_supported_platform() {
    init_tracing();
    let fake = std::sync::Arc::new(healthy_cluster("1.11.0"));
    let bundles = tempfile::tempdir().unwrap();

    let outcome = run_sanity(fake.context(test_config()), bundles.path())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ScenarioOutcome::Completed(SanityReport {
            endpoints: true,
            plans: true,
            metrics: true,
        })
    );
    assert!(!fake.is_installed(&service().name));
    assert!(fake.registered_jobs().is_empty());

    let plans: Vec<String> = fake
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::PlanStarted { plan, parameters } => {
                assert_eq!(parameters, keyspace());
                Some(plan.to_string())
            }
            _ => None,
        })
        .collect();
    assert_eq!(plans, vec!["cleanup", "repair"]);
    assert_eq!(std::fs::read_dir(bundles.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sanity_skips_metrics_on_newer_platform() {
    init_tracing();
    let fake = std::sync::Arc::new(healthy_cluster("1.13.0"));
    let bundles = tempfile::tempdir().unwrap();

    let report = run_sanity(fake.context(test_config()), bundles.path())
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert!(report.endpoints && report.plans);
    assert!(!report.metrics);
}

#[tokio::test(start_paused = true)]
async fn test_failed_repair_cleans_up_and_bundles() {
    init_tracing();
    let fake = std::sync::Arc::new(healthy_cluster("1.11.0").with_failing_plan(
        "repair",
        vec!["node-1:[repair] nodetool repair exited 2".to_string()],
    ));
    let bundles = tempfile::tempdir().unwrap();

    let err = run_sanity(fake.context(test_config()), bundles.path())
        .await
        .unwrap_err();

    match &err {
        ScenarioError::Body { source, teardown } => {
            assert!(format!("{source:#}").contains("nodetool repair exited 2"));
            assert!(teardown.is_empty());
        }
        other => panic!("expected Body error, got {other:?}"),
    }

    // After-jobs still deleted the test data.
    assert!(fake
        .job_events()
        .contains(&Event::JobRun(JobName::parse("verify-deletion").unwrap())));
    assert!(!fake.is_installed(&service().name));
    assert_eq!(std::fs::read_dir(bundles.path()).unwrap().count(), 1);
}

#[tokio::test]
#[ignore = "needs a live cluster; set SVC_API_URL"]
async fn test_sanity_live() {
    init_tracing();
    let config = OrchestratorConfig::from_env().unwrap();
    let ctx = OrchestratorContext::from_config(config).unwrap();

    match run_sanity(ctx, &bundle_base()).await {
        Ok(outcome) => info!(?outcome, "Sanity scenario finished"),
        Err(e) => panic!("sanity scenario failed: {e:#}"),
    }
}
