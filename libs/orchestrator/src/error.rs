//! Error types for the orchestrator.

use std::time::Duration;

use svc_names::{JobName, PlanName, ServiceName};
use thiserror::Error;

/// Outcome of a single failed call to the control API.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control API unreachable: {0}")]
    Unreachable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl ControlError {
    /// Create a rejection from response details.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Returns true if the addressed resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if the control API explicitly refused the request.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::Conflict(_) | Self::Unauthorized(_) | Self::NotFound(_)
        )
    }

    /// The message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Unreachable(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Unauthorized(m)
            | Self::Decode(m)
            | Self::Client(m) => m.clone(),
            Self::Rejected { message, .. } => message.clone(),
        }
    }
}

impl From<reqwest::Error> for ControlError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Client(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

/// Orchestrator operation errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The job could not be registered with the job backend.
    #[error("failed to register job {job}: {source}")]
    Registration {
        job: JobName,
        #[source]
        source: ControlError,
    },

    /// Strict removal of a job that is not registered.
    #[error("job {job} is not registered")]
    NotFound { job: JobName },

    /// A job run reached a failed terminal state.
    #[error("job {job} failed: {message}")]
    JobFailed { job: JobName, message: String },

    /// A job run did not finish in time.
    #[error("job {job} did not finish after {elapsed:?} (last status: {last_status})")]
    JobTimeout {
        job: JobName,
        elapsed: Duration,
        last_status: String,
    },

    /// The platform refused or failed an install.
    #[error("install of {service} failed: {message}")]
    Install {
        service: ServiceName,
        message: String,
    },

    /// The platform refused an uninstall.
    #[error("uninstall of {service} failed: {message}")]
    Uninstall {
        service: ServiceName,
        message: String,
    },

    /// The platform refused or failed an upgrade.
    #[error("upgrade of {service} to {version} failed: {message}")]
    Upgrade {
        service: ServiceName,
        version: String,
        message: String,
    },

    /// The service did not reach the awaited state within the retry budget.
    #[error(
        "{service} did not reach {target} after {attempts} attempts ({elapsed:?}); last status: {last_status}"
    )]
    ConvergenceTimeout {
        service: ServiceName,
        target: String,
        attempts: u32,
        elapsed: Duration,
        last_status: String,
    },

    /// The service does not know the named plan.
    #[error("plan {plan} not found on {service}")]
    PlanNotFound {
        service: ServiceName,
        plan: PlanName,
    },

    /// The service refused to start the plan.
    #[error("plan {plan} on {service} refused to start: {message}")]
    PlanStartRejected {
        service: ServiceName,
        plan: PlanName,
        message: String,
    },

    /// The plan reached the failed state.
    #[error("plan {plan} on {service} failed: {}", .errors.join("; "))]
    PlanFailed {
        service: ServiceName,
        plan: PlanName,
        errors: Vec<String>,
    },

    /// The plan was still running when the timeout elapsed.
    #[error("plan {plan} on {service} still {last_state} after {timeout:?}")]
    PlanTimeout {
        service: ServiceName,
        plan: PlanName,
        last_state: String,
        timeout: Duration,
    },

    /// The service exposes no endpoint of the requested kind.
    #[error("endpoint {kind} not found on {service}")]
    EndpointNotFound { service: ServiceName, kind: String },

    /// The metrics predicate never held before the timeout.
    #[error(
        "expected metrics for {task} on {service} not seen within {timeout:?} ({seen} distinct metrics seen)"
    )]
    MetricsTimeout {
        service: ServiceName,
        task: String,
        timeout: Duration,
        seen: usize,
    },

    /// An unexpected control API failure.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Failure writing diagnostics output.
    #[error("failed to write diagnostics bundle: {0}")]
    Bundle(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Returns true for the timeout class of errors.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::JobTimeout { .. }
                | Self::ConvergenceTimeout { .. }
                | Self::PlanTimeout { .. }
                | Self::MetricsTimeout { .. }
        )
    }
}

/// Errors surfaced by a scoped scenario (job context or harness run).
///
/// The primary failure is always the one displayed and returned from
/// `source()`. Teardown failures that happened afterwards are carried
/// alongside; they have already been logged.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Setup failed; the body never ran.
    #[error("scenario setup failed: {source}")]
    Setup {
        #[source]
        source: OrchestratorError,
        teardown: Vec<OrchestratorError>,
    },

    /// The body failed.
    #[error("scenario failed: {source}")]
    Body {
        #[source]
        source: anyhow::Error,
        teardown: Vec<OrchestratorError>,
    },

    /// The body succeeded but teardown did not.
    #[error("scenario teardown failed: {}", summarize(.0))]
    Teardown(Vec<OrchestratorError>),
}

impl ScenarioError {
    /// Teardown failures recorded after the primary outcome.
    pub fn teardown_failures(&self) -> &[OrchestratorError] {
        match self {
            Self::Setup { teardown, .. } | Self::Body { teardown, .. } => teardown,
            Self::Teardown(failures) => failures,
        }
    }

    /// Returns true if the body never ran.
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup { .. })
    }
}

fn summarize(errors: &[OrchestratorError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
