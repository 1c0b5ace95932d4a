//! The explicit context every orchestrator operation runs against.

use std::fmt;
use std::sync::Arc;

use crate::bundle::ServiceBundle;
use crate::client::{ApiClient, HttpJobBackend, HttpServiceControl};
use crate::config::OrchestratorConfig;
use crate::control::ServiceControl;
use crate::endpoints::EndpointVerifier;
use crate::error::ControlError;
use crate::hosts::HostNaming;
use crate::install::Installer;
use crate::jobs::{JobBackend, JobRunner};
use crate::metrics::MetricsVerifier;
use crate::plan::PlanExecutor;
use crate::service::ServiceRef;

/// Shared handles and configuration for one scenario.
///
/// Created at scenario start and dropped at its end. Cloning is cheap; every
/// clone talks to the same control API and job backend.
#[derive(Clone)]
pub struct OrchestratorContext {
    control: Arc<dyn ServiceControl>,
    job_backend: Arc<dyn JobBackend>,
    config: Arc<OrchestratorConfig>,
}

impl OrchestratorContext {
    /// Build a context from explicit collaborators.
    pub fn new(
        control: Arc<dyn ServiceControl>,
        job_backend: Arc<dyn JobBackend>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            control,
            job_backend,
            config: Arc::new(config),
        }
    }

    /// Build a context talking HTTP to `config.api_url`.
    pub fn from_config(config: OrchestratorConfig) -> Result<Self, ControlError> {
        let api = ApiClient::new(&config)?;
        Ok(Self::new(
            Arc::new(HttpServiceControl::new(api.clone())),
            Arc::new(HttpJobBackend::new(api)),
            config,
        ))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn control(&self) -> &Arc<dyn ServiceControl> {
        &self.control
    }

    pub fn installer(&self) -> Installer {
        Installer::new(self.control.clone(), self.config.retry_policy())
    }

    pub fn jobs(&self) -> JobRunner {
        JobRunner::new(
            self.job_backend.clone(),
            self.config.deadline_policy(self.config.job_timeout),
        )
    }

    pub fn plans(&self) -> PlanExecutor {
        PlanExecutor::new(
            self.control.clone(),
            self.config.poll_interval,
            self.config.plan_timeout,
        )
    }

    pub fn endpoints(&self) -> EndpointVerifier {
        EndpointVerifier::new(self.control.clone(), self.config.retry_policy())
    }

    pub fn metrics(&self) -> MetricsVerifier {
        MetricsVerifier::new(self.control.clone(), self.config.poll_interval)
    }

    pub fn hosts(&self) -> HostNaming {
        self.config.host_naming()
    }

    pub fn bundle(&self, service: &ServiceRef) -> ServiceBundle {
        ServiceBundle::new(self.control.clone(), service.clone())
    }
}

impl fmt::Debug for OrchestratorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorContext")
            .field("api_url", &self.config.api_url)
            .finish_non_exhaustive()
    }
}
