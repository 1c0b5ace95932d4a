//! Plan execution.
//!
//! A plan is a named, multi-step operation a service runs on request (for
//! example `repair` or `cleanup`). Each invocation moves through
//! `PENDING -> STARTED -> IN_PROGRESS -> (COMPLETE | FAILED)`; the state is
//! owned by the service and only observed here.
//!
//! The executor never serializes independent plan invocations. Callers that
//! chain plans await each one before starting the next. Whether the service
//! itself rejects a second concurrent plan is up to the service; a refusal
//! surfaces as [`OrchestratorError::PlanStartRejected`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use svc_names::PlanName;
use svc_reconcile::{poll_until, PollError, Probe, RetryPolicy};
use tracing::{info, warn};

use crate::control::{PlanParameters, ServiceControl};
use crate::error::{ControlError, OrchestratorError};
use crate::service::ServiceRef;

/// State of a plan, phase, or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanState {
    Pending,
    Started,
    InProgress,
    Waiting,
    Complete,
    Failed,
}

impl PlanState {
    /// Returns true for states that will not change without a new start.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Waiting => "WAITING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub name: String,
    pub state: PlanState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStatus {
    pub name: String,
    pub state: PlanState,
    #[serde(default)]
    pub steps: Vec<StepStatus>,
}

/// Status of a plan as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStatus {
    pub name: PlanName,
    pub state: PlanState,
    #[serde(default)]
    pub phases: Vec<PhaseStatus>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl PlanStatus {
    /// Plan-level errors followed by the messages of failed steps.
    pub fn failure_messages(&self) -> Vec<String> {
        let mut messages = self.errors.clone();
        for phase in &self.phases {
            for step in &phase.steps {
                if step.state == PlanState::Failed {
                    let detail = step.message.as_deref().unwrap_or("failed");
                    messages.push(format!("{}/{}: {}", phase.name, step.name, detail));
                }
            }
        }
        if messages.is_empty() {
            messages.push("plan failed without reported errors".to_string());
        }
        messages
    }
}

/// Starts plans and waits for them.
#[derive(Clone)]
pub struct PlanExecutor {
    control: Arc<dyn ServiceControl>,
    poll_interval: Duration,
    default_timeout: Duration,
}

impl PlanExecutor {
    /// Create an executor polling every `poll_interval`.
    pub fn new(
        control: Arc<dyn ServiceControl>,
        poll_interval: Duration,
        default_timeout: Duration,
    ) -> Self {
        Self {
            control,
            poll_interval,
            default_timeout,
        }
    }

    /// The timeout used by [`PlanExecutor::run`] when none is given.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Names of the plans the service offers.
    pub async fn list(&self, service: &ServiceRef) -> Result<Vec<PlanName>, OrchestratorError> {
        Ok(self.control.list_plans(service).await?)
    }

    /// Current status of a plan.
    pub async fn status(
        &self,
        service: &ServiceRef,
        plan: &PlanName,
    ) -> Result<PlanStatus, OrchestratorError> {
        self.control
            .plan_status(service, plan)
            .await
            .map_err(|e| plan_error(service, plan, e))
    }

    /// Start a plan with parameters.
    pub async fn start(
        &self,
        service: &ServiceRef,
        plan: &PlanName,
        parameters: &PlanParameters,
    ) -> Result<(), OrchestratorError> {
        info!(service = %service.name, %plan, ?parameters, "Starting plan");

        match self.control.start_plan(service, plan, parameters).await {
            Ok(()) => Ok(()),
            Err(ControlError::NotFound(_)) => Err(OrchestratorError::PlanNotFound {
                service: service.name.clone(),
                plan: plan.clone(),
            }),
            Err(e) if e.is_refusal() => Err(OrchestratorError::PlanStartRejected {
                service: service.name.clone(),
                plan: plan.clone(),
                message: e.message(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait until the plan is `COMPLETE`.
    pub async fn wait_for_completion(
        &self,
        service: &ServiceRef,
        plan: &PlanName,
        timeout: Duration,
    ) -> Result<PlanStatus, OrchestratorError> {
        self.wait_for_state(service, plan, PlanState::Complete, timeout)
            .await
    }

    /// Wait until the plan reaches `target`.
    ///
    /// A plan that fails while a different state is awaited fails the wait
    /// immediately with the step errors it reported.
    pub async fn wait_for_state(
        &self,
        service: &ServiceRef,
        plan: &PlanName,
        target: PlanState,
        timeout: Duration,
    ) -> Result<PlanStatus, OrchestratorError> {
        info!(service = %service.name, %plan, %target, ?timeout, "Waiting for plan");

        let control = &self.control;
        let policy = RetryPolicy::deadline(self.poll_interval, timeout);
        let resource = format!("plan {plan} on {}", service.name);

        let result = poll_until(&resource, &policy, || async move {
            let status = match control.plan_status(service, plan).await {
                Ok(status) => status,
                Err(e) if e.is_transient() => {
                    warn!(service = %service.name, %plan, error = %e, "Plan status unavailable");
                    return Ok(Probe::Pending("UNKNOWN".to_string()));
                }
                Err(e) => return Err(plan_error(service, plan, e)),
            };

            if status.state == target {
                Ok(Probe::Ready(status))
            } else if status.state == PlanState::Failed {
                Err(OrchestratorError::PlanFailed {
                    service: service.name.clone(),
                    plan: plan.clone(),
                    errors: status.failure_messages(),
                })
            } else {
                Ok(Probe::Pending(status.state.to_string()))
            }
        })
        .await;

        match result {
            Ok(status) => {
                info!(service = %service.name, %plan, state = %status.state, "Plan reached state");
                Ok(status)
            }
            Err(PollError::Probe(e)) => Err(e),
            Err(PollError::Exhausted { last_status, .. }) => Err(OrchestratorError::PlanTimeout {
                service: service.name.clone(),
                plan: plan.clone(),
                last_state: last_status.unwrap_or_else(|| "UNKNOWN".to_string()),
                timeout,
            }),
        }
    }

    /// Start a plan and wait for it to complete.
    pub async fn run(
        &self,
        service: &ServiceRef,
        plan: &PlanName,
        parameters: &PlanParameters,
        timeout: Option<Duration>,
    ) -> Result<PlanStatus, OrchestratorError> {
        self.start(service, plan, parameters).await?;
        self.wait_for_completion(service, plan, timeout.unwrap_or(self.default_timeout))
            .await
    }
}

impl fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("poll_interval", &self.poll_interval)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

fn plan_error(service: &ServiceRef, plan: &PlanName, err: ControlError) -> OrchestratorError {
    match err {
        ControlError::NotFound(_) => OrchestratorError::PlanNotFound {
            service: service.name.clone(),
            plan: plan.clone(),
        },
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_status_wire_format() {
        let status: PlanStatus = serde_json::from_str(
            r#"{
                "name": "repair",
                "state": "IN_PROGRESS",
                "phases": [{
                    "name": "repair-phase",
                    "state": "IN_PROGRESS",
                    "steps": [
                        {"name": "node-0:[repair]", "state": "COMPLETE"},
                        {"name": "node-1:[repair]", "state": "PENDING"}
                    ]
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(status.state, PlanState::InProgress);
        assert!(!status.state.is_terminal());
        assert!(status.errors.is_empty());
        assert_eq!(status.phases[0].steps.len(), 2);
    }

    #[test]
    fn test_failure_messages_include_failed_steps() {
        let status = PlanStatus {
            name: PlanName::parse("cleanup").unwrap(),
            state: PlanState::Failed,
            phases: vec![PhaseStatus {
                name: "cleanup-phase".into(),
                state: PlanState::Failed,
                steps: vec![
                    StepStatus {
                        name: "node-0:[cleanup]".into(),
                        state: PlanState::Complete,
                        message: None,
                    },
                    StepStatus {
                        name: "node-1:[cleanup]".into(),
                        state: PlanState::Failed,
                        message: Some("nodetool exited 2".into()),
                    },
                ],
            }],
            errors: vec!["1 step failed".into()],
        };

        assert_eq!(
            status.failure_messages(),
            vec![
                "1 step failed".to_string(),
                "cleanup-phase/node-1:[cleanup]: nodetool exited 2".to_string(),
            ]
        );
    }

    #[test]
    fn test_failure_messages_never_empty() {
        let status = PlanStatus {
            name: PlanName::parse("repair").unwrap(),
            state: PlanState::Failed,
            phases: vec![],
            errors: vec![],
        };
        assert_eq!(status.failure_messages().len(), 1);
    }
}
