//! Install, uninstall, and upgrade orchestration.
//!
//! Every transition is a request followed by a convergence wait:
//!
//! - **Uninstall**: request removal, then poll until the deployment is gone.
//!   An already-absent service is success.
//! - **Install**: request installation, then poll until the deployment reports
//!   the expected number of healthy running tasks.
//! - **Upgrade**: install the baseline version if the service is absent, then
//!   update to the target version with merged options and wait again.
//!
//! Waits use the convergence [`RetryPolicy`]. Exhausting it is a
//! [`OrchestratorError::ConvergenceTimeout`]; a deployment that reports the
//! `FAILED` phase is an explicit platform failure. The requests themselves are
//! retried under the same policy while the control API is unreachable.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use svc_reconcile::{poll_until, ConvergenceStatus, PollError, Probe, RetryPolicy};
use tracing::{debug, info};

use crate::control::{DeploymentPhase, DeploymentStatus, ServiceControl};
use crate::error::{ControlError, OrchestratorError};
use crate::options::{merge_options, service_name_options};
use crate::service::ServiceRef;

/// Versions and options for an upgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeOptions {
    /// Baseline version installed when the service is absent. `None` lets the
    /// platform pick its default.
    pub from_version: Option<String>,

    /// Version to upgrade to.
    pub to_version: String,

    /// Caller options, merged over the service-name options.
    pub options: Value,
}

impl UpgradeOptions {
    /// Upgrade from the platform default to `to_version` with no extra options.
    pub fn to(to_version: impl Into<String>) -> Self {
        Self {
            from_version: None,
            to_version: to_version.into(),
            options: Value::Null,
        }
    }

    /// Set the baseline version.
    #[must_use]
    pub fn from(mut self, from_version: impl Into<String>) -> Self {
        self.from_version = Some(from_version.into());
        self
    }

    /// Set caller options.
    #[must_use]
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// Which transition a convergence wait belongs to.
#[derive(Debug, Clone, Copy)]
enum Stage<'a> {
    Install,
    Upgrade { version: &'a str },
}

impl Stage<'_> {
    fn failure(&self, service: &ServiceRef, message: String) -> OrchestratorError {
        match self {
            Stage::Install => OrchestratorError::Install {
                service: service.name.clone(),
                message,
            },
            Stage::Upgrade { version } => OrchestratorError::Upgrade {
                service: service.name.clone(),
                version: version.to_string(),
                message,
            },
        }
    }
}

/// Classify a deployment against the desired outcome.
pub fn classify(
    status: &DeploymentStatus,
    expected_task_count: usize,
    version: Option<&str>,
    allow_more: bool,
) -> ConvergenceStatus {
    match status.phase {
        DeploymentPhase::Failed => return ConvergenceStatus::Diverged,
        DeploymentPhase::Deployed => {}
        DeploymentPhase::Deploying | DeploymentPhase::Uninstalling => {
            return ConvergenceStatus::Converging
        }
    }

    if version.is_some_and(|v| v != status.version) {
        return ConvergenceStatus::Converging;
    }

    ConvergenceStatus::from_task_count(status.healthy_running(), expected_task_count, allow_more)
}

/// Drives services through install, upgrade, and uninstall.
#[derive(Clone)]
pub struct Installer {
    control: Arc<dyn ServiceControl>,
    policy: RetryPolicy,
    allow_more: bool,
}

impl Installer {
    /// Create an installer waiting under `policy`.
    pub fn new(control: Arc<dyn ServiceControl>, policy: RetryPolicy) -> Self {
        Self {
            control,
            policy,
            allow_more: true,
        }
    }

    /// Whether more healthy tasks than expected still counts as converged.
    #[must_use]
    pub fn allow_more(mut self, allow_more: bool) -> Self {
        self.allow_more = allow_more;
        self
    }

    /// Remove a service and wait until it is gone.
    pub async fn uninstall(&self, service: &ServiceRef) -> Result<(), OrchestratorError> {
        info!(service = %service.name, package = %service.package, "Uninstalling service");

        let control = &self.control;
        let requested = self
            .request(service, "uninstall", || async move { control.uninstall(service).await })
            .await;

        match requested {
            Ok(()) => {}
            Err(ControlError::NotFound(_)) => {
                info!(service = %service.name, "Service already absent");
                return Ok(());
            }
            Err(e) if e.is_refusal() => {
                return Err(OrchestratorError::Uninstall {
                    service: service.name.clone(),
                    message: e.message(),
                })
            }
            Err(e) => return Err(e.into()),
        }

        let result = poll_until(&service.to_string(), &self.policy, || async move {
            match control.deployment(service).await {
                Ok(None) => Ok(Probe::Ready(())),
                Ok(Some(status)) => Ok(Probe::Pending(status.summary())),
                Err(e) if e.is_transient() => Ok(Probe::Pending(e.to_string())),
                Err(e) => Err(OrchestratorError::from(e)),
            }
        })
        .await;

        result.map_err(|e| self.timeout_error(service, "removal", e))?;
        info!(service = %service.name, "Service uninstalled");
        Ok(())
    }

    /// Install a service and wait for `expected_task_count` healthy tasks.
    pub async fn install(
        &self,
        service: &ServiceRef,
        version: Option<&str>,
        expected_task_count: usize,
        options: &Value,
    ) -> Result<DeploymentStatus, OrchestratorError> {
        info!(
            service = %service.name,
            package = %service.package,
            version = version.unwrap_or("default"),
            expected_task_count,
            "Installing service"
        );

        let control = &self.control;
        self.request(service, "install", || async move {
            control.install(service, version, options).await
        })
        .await
        .map_err(|e| refusal_or_control(e, |m| Stage::Install.failure(service, m)))?;

        self.wait_for_convergence(service, expected_task_count, version, Stage::Install)
            .await
    }

    /// Install the baseline if needed, then upgrade to the target version.
    pub async fn upgrade(
        &self,
        service: &ServiceRef,
        expected_task_count: usize,
        upgrade: &UpgradeOptions,
    ) -> Result<DeploymentStatus, OrchestratorError> {
        let options = merge_options(&service_name_options(&service.name), &upgrade.options);
        let control = &self.control;

        let current = self
            .request(service, "status", || async move { control.deployment(service).await })
            .await?;

        match current {
            None => {
                info!(
                    service = %service.name,
                    from_version = upgrade.from_version.as_deref().unwrap_or("default"),
                    "Service absent, installing baseline before upgrade"
                );
                self.install(
                    service,
                    upgrade.from_version.as_deref(),
                    expected_task_count,
                    &options,
                )
                .await?;
            }
            Some(status) => {
                debug!(service = %service.name, status = %status.summary(), "Upgrading in place");
            }
        }

        let stage = Stage::Upgrade {
            version: &upgrade.to_version,
        };
        info!(
            service = %service.name,
            to_version = %upgrade.to_version,
            "Upgrading service"
        );

        let (to_version, merged) = (upgrade.to_version.as_str(), &options);
        self.request(service, "update", || async move {
            control.update(service, to_version, merged).await
        })
        .await
        .map_err(|e| refusal_or_control(e, |m| stage.failure(service, m)))?;

        self.wait_for_convergence(
            service,
            expected_task_count,
            Some(&upgrade.to_version),
            stage,
        )
        .await
    }

    async fn wait_for_convergence(
        &self,
        service: &ServiceRef,
        expected_task_count: usize,
        version: Option<&str>,
        stage: Stage<'_>,
    ) -> Result<DeploymentStatus, OrchestratorError> {
        let control = &self.control;
        let allow_more = self.allow_more;

        let result = poll_until(&service.to_string(), &self.policy, || async move {
            let status = match control.deployment(service).await {
                Ok(Some(status)) => status,
                Ok(None) => return Ok(Probe::Pending("not deployed".to_string())),
                Err(e) if e.is_transient() => return Ok(Probe::Pending(e.to_string())),
                Err(e) => return Err(OrchestratorError::from(e)),
            };

            match classify(&status, expected_task_count, version, allow_more) {
                ConvergenceStatus::Converged => Ok(Probe::Ready(status)),
                ConvergenceStatus::Diverged => {
                    let message = status
                        .message
                        .clone()
                        .unwrap_or_else(|| status.summary());
                    Err(stage.failure(service, message))
                }
                ConvergenceStatus::Converging | ConvergenceStatus::Unknown => {
                    Ok(Probe::Pending(status.summary()))
                }
            }
        })
        .await;

        let target = format!("{expected_task_count} healthy tasks");
        let status = result.map_err(|e| self.timeout_error(service, &target, e))?;
        info!(service = %service.name, status = %status.summary(), "Service converged");
        Ok(status)
    }

    /// Send one request, repeating it while the control API is unreachable.
    async fn request<T, F, Fut>(
        &self,
        service: &ServiceRef,
        what: &str,
        mut call: F,
    ) -> Result<T, ControlError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ControlError>>,
    {
        let resource = format!("{what} request for {}", service.name);
        let result = poll_until(&resource, &self.policy, || {
            let sent = call();
            async move {
                match sent.await {
                    Ok(value) => Ok(Probe::Ready(value)),
                    Err(e) if e.is_transient() => Ok(Probe::Pending(e.message())),
                    Err(e) => Err(e),
                }
            }
        })
        .await;

        match result {
            Ok(value) => Ok(value),
            Err(PollError::Probe(e)) => Err(e),
            Err(PollError::Exhausted { last_status, .. }) => {
                Err(ControlError::Unreachable(last_status.unwrap_or_default()))
            }
        }
    }

    fn timeout_error(
        &self,
        service: &ServiceRef,
        target: &str,
        err: PollError<OrchestratorError>,
    ) -> OrchestratorError {
        match err {
            PollError::Probe(e) => e,
            PollError::Exhausted {
                attempts,
                elapsed,
                last_status,
                ..
            } => OrchestratorError::ConvergenceTimeout {
                service: service.name.clone(),
                target: target.to_string(),
                attempts,
                elapsed,
                last_status: last_status.unwrap_or_default(),
            },
        }
    }
}

fn refusal_or_control<F>(err: ControlError, refusal: F) -> OrchestratorError
where
    F: FnOnce(String) -> OrchestratorError,
{
    if err.is_refusal() {
        refusal(err.message())
    } else {
        err.into()
    }
}
