//! Service lifecycle and health-verification orchestrator.
//!
//! Drives a deployed, clustered service through install, upgrade, and
//! operational plans, waits for asynchronous convergence, and verifies what
//! the service exposes to the outside (endpoints and metrics).
//!
//! ## Architecture
//!
//! - **Service Control** ([`control`]): the seam to the cluster's control API.
//!   [`client::HttpServiceControl`] talks HTTP; tests plug in an in-memory fake.
//! - **Job Runner** ([`jobs`]): installs, runs, and removes one-off jobs, and
//!   scopes a body between before- and after-jobs.
//! - **Installer** ([`install`]): uninstall, install, and upgrade with
//!   convergence polling.
//! - **Plan Executor** ([`plan`]): starts named plans and waits for them.
//! - **Verifiers** ([`endpoints`], [`metrics`]): sanitized endpoint lookup and
//!   eventual metric presence.
//! - **Harness** ([`harness`]): the reusable scenario fixture composing all of
//!   the above with guaranteed teardown.
//!
//! Everything hangs off an explicit [`OrchestratorContext`]; there is no
//! process-wide state.

pub mod bundle;
pub mod client;
pub mod config;
pub mod context;
pub mod control;
pub mod endpoints;
pub mod error;
pub mod harness;
pub mod hosts;
pub mod install;
pub mod jobs;
pub mod metrics;
pub mod options;
pub mod plan;
pub mod service;

// Re-export commonly used types
pub use config::OrchestratorConfig;
pub use context::OrchestratorContext;
pub use control::{DeploymentPhase, DeploymentStatus, PlatformInfo, ServiceControl};
pub use error::{ControlError, OrchestratorError, ScenarioError};
pub use harness::{Harness, Requirement, ScenarioConfig, ScenarioOutcome};
pub use install::{Installer, UpgradeOptions};
pub use jobs::{Job, JobBackend, JobKind, JobRunner, RemoveMode};
pub use plan::{PlanExecutor, PlanState, PlanStatus};
pub use service::ServiceRef;
pub use svc_names::{JobName, PackageName, PlanName, PodName, ServiceName, TaskName};
