//! Service Control API interface.
//!
//! The control API is the single external collaborator every orchestrator
//! component talks to. Each call is an idempotent, pollable remote operation
//! returning structured status; callers decide what to wait for.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use svc_names::{PackageName, PlanName, PodName, TaskName};

use crate::error::ControlError;
use crate::metrics::MetricSample;
use crate::plan::PlanStatus;
use crate::service::ServiceRef;

/// Parameters passed to a plan when it is started.
pub type PlanParameters = BTreeMap<String, String>;

/// Rollout phase reported for a deployed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentPhase {
    Deploying,
    Deployed,
    Failed,
    Uninstalling,
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deploying => "DEPLOYING",
            Self::Deployed => "DEPLOYED",
            Self::Failed => "FAILED",
            Self::Uninstalling => "UNINSTALLING",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

fn default_healthy() -> bool {
    true
}

/// Status of one task of a deployed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub name: TaskName,
    pub state: TaskState,
    /// Tasks without a health check report healthy.
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

impl TaskStatus {
    /// Running and passing its health check.
    pub fn is_healthy_running(&self) -> bool {
        self.state == TaskState::Running && self.healthy
    }
}

/// Deployment status of an installed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub package: PackageName,
    pub version: String,
    pub phase: DeploymentPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskStatus>,
}

impl DeploymentStatus {
    /// Number of tasks running and healthy.
    pub fn healthy_running(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_healthy_running()).count()
    }

    /// One-line summary for logs and timeout errors.
    pub fn summary(&self) -> String {
        format!(
            "{} {} ({}/{} tasks healthy)",
            self.phase,
            self.version,
            self.healthy_running(),
            self.tasks.len()
        )
    }
}

/// Facts about the platform the service runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub version: semver::Version,
}

impl PlatformInfo {
    /// Parse a platform version leniently.
    ///
    /// Platform versions are often reported without a patch component
    /// (`1.11`) or with a bare suffix (`1.12-dev`); missing components are
    /// filled with zero.
    pub fn parse(raw: &str) -> Result<Self, semver::Error> {
        let raw = raw.trim().trim_start_matches('v');
        let (core, pre) = match raw.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (raw, None),
        };

        let mut parts: Vec<&str> = core.split('.').collect();
        while parts.len() < 3 {
            parts.push("0");
        }

        let mut normalized = parts.join(".");
        if let Some(pre) = pre {
            normalized.push('-');
            normalized.push_str(pre);
        }

        Ok(Self {
            version: semver::Version::parse(&normalized)?,
        })
    }

    /// Compare ignoring pre-release tags, so `1.12-dev` counts as 1.12.
    pub fn at_least(&self, minimum: &semver::Version) -> bool {
        let ours = (self.version.major, self.version.minor, self.version.patch);
        ours >= (minimum.major, minimum.minor, minimum.patch)
    }
}

/// Service Control API.
///
/// Package operations (install, uninstall, update) and service operations
/// (plans, endpoints, metrics, diagnostics) against a running cluster.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Report platform facts used for scenario requirements.
    async fn platform_info(&self) -> Result<PlatformInfo, ControlError>;

    /// Request installation of a package as the given service.
    async fn install(
        &self,
        service: &ServiceRef,
        version: Option<&str>,
        options: &Value,
    ) -> Result<(), ControlError>;

    /// Request removal of a service. `NotFound` if it is not installed.
    async fn uninstall(&self, service: &ServiceRef) -> Result<(), ControlError>;

    /// Request an in-place update to `version` with new options.
    async fn update(
        &self,
        service: &ServiceRef,
        version: &str,
        options: &Value,
    ) -> Result<(), ControlError>;

    /// Current deployment status, or `None` if the service is absent.
    async fn deployment(&self, service: &ServiceRef)
        -> Result<Option<DeploymentStatus>, ControlError>;

    /// Names of the plans the service offers.
    async fn list_plans(&self, service: &ServiceRef) -> Result<Vec<PlanName>, ControlError>;

    /// Start a plan with parameters.
    async fn start_plan(
        &self,
        service: &ServiceRef,
        plan: &PlanName,
        parameters: &PlanParameters,
    ) -> Result<(), ControlError>;

    /// Current status of a plan.
    async fn plan_status(
        &self,
        service: &ServiceRef,
        plan: &PlanName,
    ) -> Result<PlanStatus, ControlError>;

    /// Endpoint kinds the service exposes.
    async fn list_endpoints(&self, service: &ServiceRef) -> Result<Vec<String>, ControlError>;

    /// Raw, unsanitized endpoint fields for one kind.
    async fn endpoint(
        &self,
        service: &ServiceRef,
        kind: &str,
    ) -> Result<Map<String, Value>, ControlError>;

    /// Metric samples currently emitted by a task.
    async fn task_metrics(
        &self,
        service: &ServiceRef,
        pod: &PodName,
        task: &TaskName,
    ) -> Result<Vec<MetricSample>, ControlError>;

    /// Target configuration of the service.
    async fn describe(&self, service: &ServiceRef) -> Result<Value, ControlError>;

    /// Status of all pods of the service.
    async fn pod_status(&self, service: &ServiceRef) -> Result<Value, ControlError>;
}
