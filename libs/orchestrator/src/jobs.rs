//! Job registry and runner.
//!
//! Jobs are named, one-off units of work aimed at a target address (for
//! example, writing a test dataset to a database node). They are registered
//! with a job backend, run to completion, and removed again once the scenario
//! that needed them is over.
//!
//! [`JobRunner::run_context`] scopes a body between before-jobs and
//! after-jobs:
//!
//! 1. Each before-job is installed and run in order. A failure aborts here;
//!    the body is not entered and no after-jobs run.
//! 2. The body runs.
//! 3. Each after-job is installed and run in order, whatever the body's
//!    outcome. After-job failures are logged and collected; they never
//!    replace a body failure.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use svc_names::JobName;
use svc_reconcile::{poll_until, PollError, Probe, RetryPolicy};
use tracing::{debug, error, info};

use crate::error::{ControlError, OrchestratorError, ScenarioError};

/// What a job does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Write,
    Verify,
    Delete,
    VerifyDeletion,
}

impl JobKind {
    /// Verb used when the job has no explicit command.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Verify => "verify",
            Self::Delete => "delete",
            Self::VerifyDeletion => "verify-deletion",
        }
    }

    /// Returns true for jobs that only read.
    pub fn is_check(&self) -> bool {
        matches!(self, Self::Verify | Self::VerifyDeletion)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// A job definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: JobName,
    pub kind: JobKind,
    /// Address of the node the job acts on.
    pub target: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Overrides the kind's default verb.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Job {
    /// Create a job with no parameters.
    pub fn new(name: JobName, kind: JobKind, target: impl Into<String>) -> Self {
        Self {
            name,
            kind,
            target: target.into(),
            parameters: BTreeMap::new(),
            command: None,
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Set an explicit command.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// The command the backend should execute.
    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or(self.kind.verb())
    }
}

/// State of a single job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for JobRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status report for a job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRunStatus {
    pub status: JobRunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Job backend interface.
///
/// The execution mechanism (a scheduler, a batch system) lives behind this
/// trait.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Create or replace a job definition.
    async fn put_job(&self, job: &Job) -> Result<(), ControlError>;

    /// Delete a job definition. `NotFound` if it is not registered.
    async fn delete_job(&self, name: &JobName) -> Result<(), ControlError>;

    /// Start a run and return its run ID.
    async fn start_run(&self, name: &JobName) -> Result<String, ControlError>;

    /// Status of a run.
    async fn run_status(&self, name: &JobName, run_id: &str)
        -> Result<JobRunStatus, ControlError>;
}

/// How [`JobRunner::remove`] treats a job that is already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoveMode {
    /// Absent jobs are a no-op.
    #[default]
    Lenient,

    /// Absent jobs are an error.
    Strict,
}

/// Installs, runs, and removes jobs.
#[derive(Clone)]
pub struct JobRunner {
    backend: Arc<dyn JobBackend>,
    run_policy: RetryPolicy,
}

impl JobRunner {
    /// Create a runner; `run_policy` bounds each job run.
    pub fn new(backend: Arc<dyn JobBackend>, run_policy: RetryPolicy) -> Self {
        Self {
            backend,
            run_policy,
        }
    }

    /// Register a job, replacing any definition with the same name.
    pub async fn install(&self, job: &Job) -> Result<(), OrchestratorError> {
        debug!(job = %job.name, kind = %job.kind, target = %job.target, "Installing job");

        self.backend
            .put_job(job)
            .await
            .map_err(|source| OrchestratorError::Registration {
                job: job.name.clone(),
                source,
            })
    }

    /// Deregister a job.
    pub async fn remove(&self, job: &Job, mode: RemoveMode) -> Result<(), OrchestratorError> {
        debug!(job = %job.name, ?mode, "Removing job");

        match self.backend.delete_job(&job.name).await {
            Ok(()) => Ok(()),
            Err(ControlError::NotFound(_)) if mode == RemoveMode::Lenient => {
                debug!(job = %job.name, "Job already absent");
                Ok(())
            }
            Err(ControlError::NotFound(_)) => Err(OrchestratorError::NotFound {
                job: job.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Run an installed job to completion.
    pub async fn run(&self, job: &Job) -> Result<(), OrchestratorError> {
        info!(job = %job.name, kind = %job.kind, target = %job.target, "Running job");

        let run_id = self.backend.start_run(&job.name).await?;
        let backend = &self.backend;
        let name = &job.name;
        let run_id = run_id.as_str();

        let resource = format!("job {name} run {run_id}");
        let result = poll_until(&resource, &self.run_policy, || async move {
            match backend.run_status(name, run_id).await {
                Ok(report) => match report.status {
                    JobRunState::Succeeded => Ok(Probe::Ready(())),
                    JobRunState::Failed => Err(OrchestratorError::JobFailed {
                        job: name.clone(),
                        message: report
                            .message
                            .unwrap_or_else(|| "run failed without a message".to_string()),
                    }),
                    state => Ok(Probe::Pending(state.to_string())),
                },
                Err(e) if e.is_transient() => Ok(Probe::Pending(e.to_string())),
                Err(e) => Err(e.into()),
            }
        })
        .await;

        match result {
            Ok(()) => {
                info!(job = %job.name, "Job succeeded");
                Ok(())
            }
            Err(PollError::Probe(e)) => Err(e),
            Err(PollError::Exhausted {
                elapsed,
                last_status,
                ..
            }) => Err(OrchestratorError::JobTimeout {
                job: job.name.clone(),
                elapsed,
                last_status: last_status.unwrap_or_default(),
            }),
        }
    }

    /// Install then run.
    pub async fn install_and_run(&self, job: &Job) -> Result<(), OrchestratorError> {
        self.install(job).await?;
        self.run(job).await
    }

    /// Run `body` between `before` and `after` jobs.
    pub async fn run_context<F, Fut, T>(
        &self,
        before: &[Job],
        after: &[Job],
        body: F,
    ) -> Result<T, ScenarioError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        for job in before {
            if let Err(source) = self.install_and_run(job).await {
                error!(job = %job.name, error = %source, "Before-job failed, skipping body");
                return Err(ScenarioError::Setup {
                    source,
                    teardown: Vec::new(),
                });
            }
        }

        let outcome = body().await;
        let teardown = self.run_after(after).await;

        match outcome {
            Ok(value) if teardown.is_empty() => Ok(value),
            Ok(_) => Err(ScenarioError::Teardown(teardown)),
            Err(source) => Err(ScenarioError::Body { source, teardown }),
        }
    }

    /// Run every after-job, collecting failures instead of stopping.
    async fn run_after(&self, after: &[Job]) -> Vec<OrchestratorError> {
        let mut failures = Vec::new();
        for job in after {
            if let Err(e) = self.install_and_run(job).await {
                error!(job = %job.name, error = %e, "After-job failed");
                failures.push(e);
            }
        }
        failures
    }
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("run_policy", &self.run_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_command() {
        let job = Job::new(
            JobName::parse("verify-data").unwrap(),
            JobKind::Verify,
            "node-0-server.cassandra.autoip.dcos.thisdcos.directory:9042",
        );
        assert_eq!(job.effective_command(), "verify");
        assert!(job.kind.is_check());

        let job = job.with_command("cqlsh -e 'SELECT * FROM testspace1.testtable'");
        assert!(job.effective_command().starts_with("cqlsh"));
    }

    #[test]
    fn test_job_kind_wire_format() {
        let json = serde_json::to_string(&JobKind::VerifyDeletion).unwrap();
        assert_eq!(json, "\"verify-deletion\"");
    }

    #[test]
    fn test_job_parameters_deserialize_default() {
        let job: Job = serde_json::from_str(
            r#"{"name": "write-data", "kind": "write", "target": "node-0:9042"}"#,
        )
        .unwrap();
        assert!(job.parameters.is_empty());
        assert!(job.command.is_none());
    }
}
