//! In-memory cluster for orchestrator tests.
//!
//! [`FakeCluster`] implements both [`ServiceControl`] and [`JobBackend`] so a
//! whole [`OrchestratorContext`] can run without a cluster. Behaviour is
//! scripted up front with `with_*` builders and adjusted at runtime through
//! `&self` setters; every mutating call is recorded as an [`Event`] so tests
//! can assert ordering.
//!
//! Deployments converge by being polled: an install or update moves the
//! service to `DEPLOYING`, and it reports `DEPLOYED` after a configurable
//! number of status polls. Uninstall works the same way in reverse.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use svc_names::{JobName, PackageName, PlanName, PodName, ServiceName, TaskName};
use svc_orchestrator::control::{
    DeploymentPhase, DeploymentStatus, PlanParameters, PlatformInfo, ServiceControl, TaskState,
    TaskStatus,
};
use svc_orchestrator::jobs::{Job, JobBackend, JobRunState, JobRunStatus};
use svc_orchestrator::metrics::MetricSample;
use svc_orchestrator::plan::{PhaseStatus, PlanState, PlanStatus, StepStatus};
use svc_orchestrator::{ControlError, OrchestratorConfig, OrchestratorContext, ServiceRef};
use tracing::debug;

/// A mutating call observed by the fake.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Install {
        service: ServiceName,
        version: Option<String>,
    },
    Update {
        service: ServiceName,
        version: String,
    },
    Uninstall {
        service: ServiceName,
    },
    PlanStarted {
        plan: PlanName,
        parameters: PlanParameters,
    },
    JobInstalled(JobName),
    JobRun(JobName),
    JobRemoved(JobName),
}

/// Configuration with short deadlines, suited to a paused test clock.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        plan_timeout: Duration::from_secs(60),
        job_timeout: Duration::from_secs(60),
        metrics_timeout: Duration::from_secs(60),
        ..OrchestratorConfig::default()
    }
}

struct Deployment {
    package: PackageName,
    version: String,
    options: Value,
    phase: DeploymentPhase,
    /// Status polls left before the phase moves on.
    remaining: u32,
}

struct PlanScript {
    /// States reported by successive status polls; the last one repeats.
    states: Vec<PlanState>,
    errors: Vec<String>,
    /// Index of the next state to report; `None` until started.
    cursor: Option<usize>,
}

impl PlanScript {
    fn new(states: Vec<PlanState>, errors: Vec<String>) -> Self {
        let states = if states.is_empty() {
            vec![PlanState::Complete]
        } else {
            states
        };
        Self {
            states,
            errors,
            cursor: None,
        }
    }

    fn state_at(&self, index: usize) -> PlanState {
        self.states[index.min(self.states.len() - 1)]
    }

    fn is_active(&self) -> bool {
        self.cursor
            .is_some_and(|cursor| !self.state_at(cursor).is_terminal())
    }

    fn advance(&mut self) -> PlanState {
        match self.cursor {
            None => PlanState::Pending,
            Some(cursor) => {
                self.cursor = Some(cursor + 1);
                self.state_at(cursor)
            }
        }
    }
}

struct MetricStream {
    batches: Vec<Vec<MetricSample>>,
    next: usize,
}

struct Run {
    job: JobName,
    polls: u32,
}

struct State {
    platform_version: String,
    default_version: String,
    task_count: usize,
    converge_polls: u32,
    teardown_polls: u32,
    run_polls: u32,
    fail_next_calls: u32,
    registry_down: bool,
    reject_install: Option<String>,
    reject_update: Option<String>,
    reject_uninstall: Option<String>,
    fail_rollout: Option<String>,
    exclusive_plans: bool,
    deployments: BTreeMap<ServiceName, Deployment>,
    plans: BTreeMap<PlanName, PlanScript>,
    endpoints: BTreeMap<String, Map<String, Value>>,
    metrics: BTreeMap<(PodName, TaskName), MetricStream>,
    jobs: BTreeMap<JobName, Job>,
    runs: BTreeMap<String, Run>,
    failing_jobs: BTreeMap<JobName, String>,
    hanging_jobs: HashSet<JobName>,
    run_counter: u64,
    events: Vec<Event>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            platform_version: "1.13.0".to_string(),
            default_version: "1.0.0".to_string(),
            task_count: 3,
            converge_polls: 2,
            teardown_polls: 1,
            run_polls: 1,
            fail_next_calls: 0,
            registry_down: false,
            reject_install: None,
            reject_update: None,
            reject_uninstall: None,
            fail_rollout: None,
            exclusive_plans: false,
            deployments: BTreeMap::new(),
            plans: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            metrics: BTreeMap::new(),
            jobs: BTreeMap::new(),
            runs: BTreeMap::new(),
            failing_jobs: BTreeMap::new(),
            hanging_jobs: HashSet::new(),
            run_counter: 0,
            events: Vec::new(),
        }
    }
}

impl State {
    /// Consume one scripted transient failure, if any are pending.
    fn check_reachable(&mut self) -> Result<(), ControlError> {
        if self.fail_next_calls > 0 {
            self.fail_next_calls -= 1;
            return Err(ControlError::Unreachable("injected failure".to_string()));
        }
        Ok(())
    }
}

/// In-memory [`ServiceControl`] and [`JobBackend`].
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn configure(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut *self.state());
        self
    }

    /// Build a context backed by this fake for both seams.
    pub fn context(self: &Arc<Self>, config: OrchestratorConfig) -> OrchestratorContext {
        OrchestratorContext::new(self.clone(), self.clone(), config)
    }

    // Builders

    #[must_use]
    pub fn with_platform_version(self, version: &str) -> Self {
        self.configure(|s| s.platform_version = version.to_string())
    }

    /// Version installed when the caller does not name one.
    #[must_use]
    pub fn with_default_version(self, version: &str) -> Self {
        self.configure(|s| s.default_version = version.to_string())
    }

    /// Healthy tasks a deployed service reports.
    #[must_use]
    pub fn with_task_count(self, count: usize) -> Self {
        self.configure(|s| s.task_count = count)
    }

    /// Status polls a rollout stays `DEPLOYING` for.
    #[must_use]
    pub fn with_converge_polls(self, polls: u32) -> Self {
        self.configure(|s| s.converge_polls = polls)
    }

    /// Status polls an uninstall stays `UNINSTALLING` for.
    #[must_use]
    pub fn with_teardown_polls(self, polls: u32) -> Self {
        self.configure(|s| s.teardown_polls = polls)
    }

    /// Status polls a job run stays `running` for.
    #[must_use]
    pub fn with_run_polls(self, polls: u32) -> Self {
        self.configure(|s| s.run_polls = polls)
    }

    /// A service already deployed at `version`.
    #[must_use]
    pub fn with_installed(self, service: &ServiceRef, version: &str) -> Self {
        self.configure(|s| {
            s.deployments.insert(
                service.name.clone(),
                Deployment {
                    package: service.package.clone(),
                    version: version.to_string(),
                    options: Value::Null,
                    phase: DeploymentPhase::Deployed,
                    remaining: 0,
                },
            );
        })
    }

    /// A plan reporting `states` on successive polls after it is started.
    #[must_use]
    pub fn with_plan(self, plan: &str, states: Vec<PlanState>) -> Self {
        self.with_plan_script(plan, states, Vec::new())
    }

    /// A plan that runs briefly and then fails with `errors`.
    #[must_use]
    pub fn with_failing_plan(self, plan: &str, errors: Vec<String>) -> Self {
        let states = vec![PlanState::Started, PlanState::InProgress, PlanState::Failed];
        self.with_plan_script(plan, states, errors)
    }

    fn with_plan_script(self, plan: &str, states: Vec<PlanState>, errors: Vec<String>) -> Self {
        match PlanName::parse(plan) {
            Ok(name) => self.configure(|s| {
                s.plans.insert(name, PlanScript::new(states, errors));
            }),
            Err(e) => panic!("invalid plan name in fake: {e}"),
        }
    }

    /// Refuse to start a plan while another one is running.
    #[must_use]
    pub fn with_exclusive_plans(self) -> Self {
        self.configure(|s| s.exclusive_plans = true)
    }

    /// Raw endpoint payload for `kind`, returned unsanitized.
    #[must_use]
    pub fn with_endpoint(self, kind: &str, raw: Value) -> Self {
        let fields = match raw {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.configure(|s| {
            s.endpoints.insert(kind.to_string(), fields);
        })
    }

    /// Metric batches for a task, returned one per poll and cycled.
    #[must_use]
    pub fn with_metric_batches(
        self,
        pod: &PodName,
        task: &TaskName,
        batches: Vec<Vec<MetricSample>>,
    ) -> Self {
        self.configure(|s| {
            s.metrics.insert(
                (pod.clone(), task.clone()),
                MetricStream { batches, next: 0 },
            );
        })
    }

    // Runtime controls

    /// The next `count` calls fail as unreachable.
    pub fn fail_next_calls(&self, count: u32) {
        self.state().fail_next_calls = count;
    }

    /// Job registration fails as unreachable while set.
    pub fn set_registry_down(&self, down: bool) {
        self.state().registry_down = down;
    }

    pub fn reject_install(&self, message: &str) {
        self.state().reject_install = Some(message.to_string());
    }

    pub fn reject_update(&self, message: &str) {
        self.state().reject_update = Some(message.to_string());
    }

    pub fn reject_uninstall(&self, message: &str) {
        self.state().reject_uninstall = Some(message.to_string());
    }

    /// Rollouts end in `FAILED` with `message`.
    pub fn fail_rollout(&self, message: &str) {
        self.state().fail_rollout = Some(message.to_string());
    }

    /// Runs of `job` end in `failed` with `message`.
    pub fn fail_job(&self, job: &JobName, message: &str) {
        self.state()
            .failing_jobs
            .insert(job.clone(), message.to_string());
    }

    /// Runs of `job` never finish.
    pub fn hang_job(&self, job: &JobName) {
        self.state().hanging_jobs.insert(job.clone());
    }

    // Inspection

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    /// Job events only, in order.
    pub fn job_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::JobInstalled(_) | Event::JobRun(_) | Event::JobRemoved(_)
                )
            })
            .collect()
    }

    pub fn installed_version(&self, service: &ServiceName) -> Option<String> {
        self.state()
            .deployments
            .get(service)
            .map(|d| d.version.clone())
    }

    pub fn installed_options(&self, service: &ServiceName) -> Option<Value> {
        self.state()
            .deployments
            .get(service)
            .map(|d| d.options.clone())
    }

    pub fn is_installed(&self, service: &ServiceName) -> bool {
        self.state().deployments.contains_key(service)
    }

    pub fn registered_jobs(&self) -> Vec<JobName> {
        self.state().jobs.keys().cloned().collect()
    }
}

fn task_statuses(phase: DeploymentPhase, count: usize) -> Vec<TaskStatus> {
    let state = match phase {
        DeploymentPhase::Deployed => TaskState::Running,
        DeploymentPhase::Deploying => TaskState::Staging,
        DeploymentPhase::Failed => TaskState::Failed,
        DeploymentPhase::Uninstalling => TaskState::Killed,
    };
    (0..count)
        .filter_map(|i| TaskName::parse(&format!("node-{i}-server")).ok())
        .map(|name| TaskStatus {
            name,
            state,
            healthy: state == TaskState::Running,
        })
        .collect()
}

fn plan_status(name: &PlanName, script: &PlanScript, state: PlanState) -> PlanStatus {
    let step_message = match state {
        PlanState::Failed => script.errors.first().cloned(),
        _ => None,
    };
    PlanStatus {
        name: name.clone(),
        state,
        phases: vec![PhaseStatus {
            name: format!("{name}-phase"),
            state,
            steps: vec![StepStatus {
                name: format!("node-0:[{name}]"),
                state,
                message: step_message,
            }],
        }],
        errors: if state == PlanState::Failed {
            script.errors.clone()
        } else {
            Vec::new()
        },
    }
}

#[async_trait]
impl ServiceControl for FakeCluster {
    async fn platform_info(&self) -> Result<PlatformInfo, ControlError> {
        let mut state = self.state();
        state.check_reachable()?;
        PlatformInfo::parse(&state.platform_version)
            .map_err(|e| ControlError::Decode(e.to_string()))
    }

    async fn install(
        &self,
        service: &ServiceRef,
        version: Option<&str>,
        options: &Value,
    ) -> Result<(), ControlError> {
        let mut state = self.state();
        state.check_reachable()?;

        if let Some(message) = &state.reject_install {
            return Err(ControlError::rejected(400, message.clone()));
        }
        if state.deployments.contains_key(&service.name) {
            return Err(ControlError::Conflict(format!("{} is already installed", service.name)));
        }

        let version = version.map_or_else(|| state.default_version.clone(), str::to_string);
        debug!(service = %service.name, %version, "[FAKE] Installing");
        let remaining = state.converge_polls;
        state.deployments.insert(
            service.name.clone(),
            Deployment {
                package: service.package.clone(),
                version: version.clone(),
                options: options.clone(),
                phase: DeploymentPhase::Deploying,
                remaining,
            },
        );
        state.events.push(Event::Install {
            service: service.name.clone(),
            version: Some(version),
        });
        Ok(())
    }

    async fn uninstall(&self, service: &ServiceRef) -> Result<(), ControlError> {
        let mut state = self.state();
        state.check_reachable()?;

        if let Some(message) = &state.reject_uninstall {
            return Err(ControlError::rejected(403, message.clone()));
        }

        let remaining = state.teardown_polls;
        let Some(deployment) = state.deployments.get_mut(&service.name) else {
            return Err(ControlError::NotFound(format!("{} is not installed", service.name)));
        };
        if deployment.phase != DeploymentPhase::Uninstalling {
            deployment.phase = DeploymentPhase::Uninstalling;
            deployment.remaining = remaining;
        }

        debug!(service = %service.name, "[FAKE] Uninstalling");
        state.events.push(Event::Uninstall {
            service: service.name.clone(),
        });
        Ok(())
    }

    async fn update(
        &self,
        service: &ServiceRef,
        version: &str,
        options: &Value,
    ) -> Result<(), ControlError> {
        let mut state = self.state();
        state.check_reachable()?;

        if let Some(message) = &state.reject_update {
            return Err(ControlError::rejected(400, message.clone()));
        }

        let remaining = state.converge_polls;
        let Some(deployment) = state.deployments.get_mut(&service.name) else {
            return Err(ControlError::NotFound(format!("{} is not installed", service.name)));
        };
        deployment.version = version.to_string();
        deployment.options = options.clone();
        deployment.phase = DeploymentPhase::Deploying;
        deployment.remaining = remaining;

        debug!(service = %service.name, version, "[FAKE] Updating");
        state.events.push(Event::Update {
            service: service.name.clone(),
            version: version.to_string(),
        });
        Ok(())
    }

    async fn deployment(
        &self,
        service: &ServiceRef,
    ) -> Result<Option<DeploymentStatus>, ControlError> {
        let mut guard = self.state();
        guard.check_reachable()?;

        let State {
            deployments,
            fail_rollout,
            task_count,
            ..
        } = &mut *guard;

        let Some(deployment) = deployments.get_mut(&service.name) else {
            return Ok(None);
        };

        match deployment.phase {
            DeploymentPhase::Uninstalling if deployment.remaining == 0 => {
                deployments.remove(&service.name);
                return Ok(None);
            }
            DeploymentPhase::Deploying if deployment.remaining == 0 => {
                deployment.phase = if fail_rollout.is_some() {
                    DeploymentPhase::Failed
                } else {
                    DeploymentPhase::Deployed
                };
            }
            DeploymentPhase::Uninstalling | DeploymentPhase::Deploying => {
                deployment.remaining -= 1;
            }
            DeploymentPhase::Deployed | DeploymentPhase::Failed => {}
        }

        let message = match deployment.phase {
            DeploymentPhase::Failed => fail_rollout.clone(),
            _ => None,
        };
        Ok(Some(DeploymentStatus {
            package: deployment.package.clone(),
            version: deployment.version.clone(),
            phase: deployment.phase,
            message,
            tasks: task_statuses(deployment.phase, *task_count),
        }))
    }

    async fn list_plans(&self, _service: &ServiceRef) -> Result<Vec<PlanName>, ControlError> {
        let mut state = self.state();
        state.check_reachable()?;
        Ok(state.plans.keys().cloned().collect())
    }

    async fn start_plan(
        &self,
        _service: &ServiceRef,
        plan: &PlanName,
        parameters: &PlanParameters,
    ) -> Result<(), ControlError> {
        let mut state = self.state();
        state.check_reachable()?;

        if !state.plans.contains_key(plan) {
            return Err(ControlError::NotFound(format!("plan {plan} not found")));
        }
        if state.exclusive_plans {
            let running = state
                .plans
                .iter()
                .find(|(name, script)| *name != plan && script.is_active())
                .map(|(name, _)| name.clone());
            if let Some(running) = running {
                return Err(ControlError::Conflict(format!("plan {running} is in progress")));
            }
        }

        if let Some(script) = state.plans.get_mut(plan) {
            script.cursor = Some(0);
        }
        debug!(%plan, ?parameters, "[FAKE] Starting plan");
        state.events.push(Event::PlanStarted {
            plan: plan.clone(),
            parameters: parameters.clone(),
        });
        Ok(())
    }

    async fn plan_status(
        &self,
        _service: &ServiceRef,
        plan: &PlanName,
    ) -> Result<PlanStatus, ControlError> {
        let mut state = self.state();
        state.check_reachable()?;

        let Some(script) = state.plans.get_mut(plan) else {
            return Err(ControlError::NotFound(format!("plan {plan} not found")));
        };
        let current = script.advance();
        Ok(plan_status(plan, script, current))
    }

    async fn list_endpoints(&self, _service: &ServiceRef) -> Result<Vec<String>, ControlError> {
        let mut state = self.state();
        state.check_reachable()?;
        Ok(state.endpoints.keys().cloned().collect())
    }

    async fn endpoint(
        &self,
        _service: &ServiceRef,
        kind: &str,
    ) -> Result<Map<String, Value>, ControlError> {
        let mut state = self.state();
        state.check_reachable()?;
        state
            .endpoints
            .get(kind)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(format!("endpoint {kind} not found")))
    }

    async fn task_metrics(
        &self,
        _service: &ServiceRef,
        pod: &PodName,
        task: &TaskName,
    ) -> Result<Vec<MetricSample>, ControlError> {
        let mut state = self.state();
        state.check_reachable()?;

        let Some(stream) = state.metrics.get_mut(&(pod.clone(), task.clone())) else {
            return Err(ControlError::NotFound(format!("no metrics for {pod}/{task}")));
        };
        if stream.batches.is_empty() {
            return Ok(Vec::new());
        }
        let batch = stream.batches[stream.next % stream.batches.len()].clone();
        stream.next += 1;
        Ok(batch)
    }

    async fn describe(&self, service: &ServiceRef) -> Result<Value, ControlError> {
        let mut state = self.state();
        state.check_reachable()?;
        state
            .deployments
            .get(&service.name)
            .map(|d| d.options.clone())
            .ok_or_else(|| ControlError::NotFound(format!("{} is not installed", service.name)))
    }

    async fn pod_status(&self, service: &ServiceRef) -> Result<Value, ControlError> {
        let mut state = self.state();
        state.check_reachable()?;

        let task_count = state.task_count;
        let Some(deployment) = state.deployments.get(&service.name) else {
            return Err(ControlError::NotFound(format!("{} is not installed", service.name)));
        };
        let pods: Vec<Value> = task_statuses(deployment.phase, task_count)
            .into_iter()
            .enumerate()
            .map(|(i, task)| {
                json!({
                    "name": format!("node-{i}"),
                    "tasks": [{ "name": task.name, "status": task.state }],
                })
            })
            .collect();
        Ok(json!({ "service": service.name, "pods": pods }))
    }
}

#[async_trait]
impl JobBackend for FakeCluster {
    async fn put_job(&self, job: &Job) -> Result<(), ControlError> {
        let mut state = self.state();
        state.check_reachable()?;
        if state.registry_down {
            return Err(ControlError::Unreachable("job registry is down".to_string()));
        }

        state.jobs.insert(job.name.clone(), job.clone());
        state.events.push(Event::JobInstalled(job.name.clone()));
        Ok(())
    }

    async fn delete_job(&self, name: &JobName) -> Result<(), ControlError> {
        let mut state = self.state();
        state.check_reachable()?;

        if state.jobs.remove(name).is_none() {
            return Err(ControlError::NotFound(format!("job {name} not found")));
        }
        state.events.push(Event::JobRemoved(name.clone()));
        Ok(())
    }

    async fn start_run(&self, name: &JobName) -> Result<String, ControlError> {
        let mut state = self.state();
        state.check_reachable()?;

        if !state.jobs.contains_key(name) {
            return Err(ControlError::NotFound(format!("job {name} not found")));
        }
        state.run_counter += 1;
        let run_id = format!("run-{:04}", state.run_counter);
        state.runs.insert(
            run_id.clone(),
            Run {
                job: name.clone(),
                polls: 0,
            },
        );
        state.events.push(Event::JobRun(name.clone()));
        Ok(run_id)
    }

    async fn run_status(&self, name: &JobName, run_id: &str) -> Result<JobRunStatus, ControlError> {
        let mut guard = self.state();
        guard.check_reachable()?;

        let State {
            runs,
            run_polls,
            failing_jobs,
            hanging_jobs,
            ..
        } = &mut *guard;

        let Some(run) = runs.get_mut(run_id).filter(|run| &run.job == name) else {
            return Err(ControlError::NotFound(format!("run {run_id} of {name} not found")));
        };

        if hanging_jobs.contains(&run.job) || run.polls < *run_polls {
            run.polls += 1;
            return Ok(JobRunStatus {
                status: JobRunState::Running,
                message: None,
            });
        }

        Ok(match failing_jobs.get(&run.job) {
            Some(message) => JobRunStatus {
                status: JobRunState::Failed,
                message: Some(message.clone()),
            },
            None => JobRunStatus {
                status: JobRunState::Succeeded,
                message: None,
            },
        })
    }
}
