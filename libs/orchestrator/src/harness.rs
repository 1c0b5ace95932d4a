//! Scenario harness.
//!
//! The reusable fixture every scenario builds on:
//!
//! 1. Evaluate [`Requirement`]s against the platform; an unmet one skips the
//!    scenario before anything touches the cluster.
//! 2. Install the fixture jobs (replacing stale definitions).
//! 3. Uninstall any leftover service instance.
//! 4. Upgrade (installing the baseline first) to the target version.
//! 5. Run the body with the shared [`OrchestratorContext`].
//! 6. Uninstall the service and remove the fixture jobs.
//!
//! Step 6 runs whenever step 2 was reached, including after a setup failure.
//! Teardown failures are logged and attached to the result; they never
//! replace the primary failure.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use semver::Version;
use tracing::{error, info, warn};

use crate::context::OrchestratorContext;
use crate::control::PlatformInfo;
use crate::error::{OrchestratorError, ScenarioError};
use crate::install::UpgradeOptions;
use crate::jobs::{Job, RemoveMode};
use crate::service::ServiceRef;

type PlatformCheck = Arc<dyn Fn(&PlatformInfo) -> bool + Send + Sync>;

/// A precondition on the platform, checked before a scenario runs.
#[derive(Clone)]
pub enum Requirement {
    /// Platform version must be at least this.
    MinPlatformVersion(Version),

    /// Platform version must be below this.
    BelowPlatformVersion(Version),

    /// Arbitrary predicate; `reason` is reported when it does not hold.
    Custom { reason: String, check: PlatformCheck },
}

impl Requirement {
    /// Build a custom requirement.
    pub fn custom<F>(reason: impl Into<String>, check: F) -> Self
    where
        F: Fn(&PlatformInfo) -> bool + Send + Sync + 'static,
    {
        Self::Custom {
            reason: reason.into(),
            check: Arc::new(check),
        }
    }

    /// Why the requirement does not hold, or `None` if it does.
    pub fn unmet_reason(&self, platform: &PlatformInfo) -> Option<String> {
        match self {
            Self::MinPlatformVersion(min) if !platform.at_least(min) => Some(format!(
                "requires platform {min} or newer, found {}",
                platform.version
            )),
            Self::BelowPlatformVersion(max) if platform.at_least(max) => Some(format!(
                "requires platform older than {max}, found {}",
                platform.version
            )),
            Self::Custom { reason, check } if !check(platform) => Some(reason.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinPlatformVersion(v) => f.debug_tuple("MinPlatformVersion").field(v).finish(),
            Self::BelowPlatformVersion(v) => {
                f.debug_tuple("BelowPlatformVersion").field(v).finish()
            }
            Self::Custom { reason, .. } => f
                .debug_struct("Custom")
                .field("reason", reason)
                .finish_non_exhaustive(),
        }
    }
}

/// What a scenario needs in place before its body runs.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub service: ServiceRef,
    pub expected_task_count: usize,
    pub upgrade: UpgradeOptions,
    /// Jobs installed for the body to run and removed afterwards.
    pub jobs: Vec<Job>,
    pub requirements: Vec<Requirement>,
}

impl ScenarioConfig {
    pub fn new(service: ServiceRef, expected_task_count: usize, upgrade: UpgradeOptions) -> Self {
        Self {
            service,
            expected_task_count,
            upgrade,
            jobs: Vec::new(),
            requirements: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_jobs(mut self, jobs: impl IntoIterator<Item = Job>) -> Self {
        self.jobs.extend(jobs);
        self
    }

    #[must_use]
    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }
}

/// Result of a scenario that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome<T> {
    Completed(T),
    Skipped { reason: String },
}

impl<T> ScenarioOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// The body's value, if it ran.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Skipped { .. } => None,
        }
    }
}

/// Runs scenarios against one service.
#[derive(Debug, Clone)]
pub struct Harness {
    ctx: OrchestratorContext,
    config: ScenarioConfig,
}

impl Harness {
    pub fn new(ctx: OrchestratorContext, config: ScenarioConfig) -> Self {
        Self { ctx, config }
    }

    pub fn context(&self) -> &OrchestratorContext {
        &self.ctx
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Run `body` inside the fixture.
    pub async fn run<F, Fut, T>(&self, body: F) -> Result<ScenarioOutcome<T>, ScenarioError>
    where
        F: FnOnce(OrchestratorContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let service = &self.config.service;

        match self.unmet_requirement().await {
            Ok(Some(reason)) => {
                info!(service = %service.name, %reason, "Skipping scenario");
                return Ok(ScenarioOutcome::Skipped { reason });
            }
            Ok(None) => {}
            Err(source) => {
                return Err(ScenarioError::Setup {
                    source,
                    teardown: Vec::new(),
                })
            }
        }

        info!(service = %service.name, "Setting up scenario");
        if let Err(source) = self.setup().await {
            error!(service = %service.name, error = %source, "Scenario setup failed");
            let teardown = self.teardown().await;
            return Err(ScenarioError::Setup { source, teardown });
        }

        info!(service = %service.name, "Running scenario body");
        let outcome = body(self.ctx.clone()).await;
        if let Err(e) = &outcome {
            error!(service = %service.name, error = %e, "Scenario body failed");
        }

        let teardown = self.teardown().await;
        match outcome {
            Ok(value) if teardown.is_empty() => {
                info!(service = %service.name, "Scenario completed");
                Ok(ScenarioOutcome::Completed(value))
            }
            Ok(_) => Err(ScenarioError::Teardown(teardown)),
            Err(source) => Err(ScenarioError::Body { source, teardown }),
        }
    }

    async fn unmet_requirement(&self) -> Result<Option<String>, OrchestratorError> {
        if self.config.requirements.is_empty() {
            return Ok(None);
        }

        let platform = self.ctx.control().platform_info().await?;
        Ok(self
            .config
            .requirements
            .iter()
            .find_map(|r| r.unmet_reason(&platform)))
    }

    async fn setup(&self) -> Result<(), OrchestratorError> {
        let jobs = self.ctx.jobs();
        for job in &self.config.jobs {
            jobs.install(job).await?;
        }

        let installer = self.ctx.installer();
        installer.uninstall(&self.config.service).await?;
        installer
            .upgrade(
                &self.config.service,
                self.config.expected_task_count,
                &self.config.upgrade,
            )
            .await?;
        Ok(())
    }

    /// Uninstall the service and remove fixture jobs, collecting failures.
    async fn teardown(&self) -> Vec<OrchestratorError> {
        let service = &self.config.service;
        let mut failures = Vec::new();

        info!(service = %service.name, "Tearing down scenario");
        if let Err(e) = self.ctx.installer().uninstall(service).await {
            error!(service = %service.name, error = %e, "Teardown uninstall failed");
            failures.push(e);
        }

        let jobs = self.ctx.jobs();
        for job in &self.config.jobs {
            if let Err(e) = jobs.remove(job, RemoveMode::Lenient).await {
                warn!(job = %job.name, error = %e, "Teardown job removal failed");
                failures.push(e);
            }
        }
        failures
    }
}
