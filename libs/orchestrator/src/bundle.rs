//! Diagnostics bundle for a service.
//!
//! Collects what the control API knows about a service into a timestamped
//! directory of pretty-printed JSON files. Individual control API failures do
//! not abort the bundle; they are logged and reported alongside the files
//! that were written.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::control::ServiceControl;
use crate::error::{ControlError, OrchestratorError};
use crate::service::ServiceRef;

/// What a bundle run produced.
#[derive(Debug)]
pub struct BundleReport {
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
    /// Files that could not be collected, with the control API error.
    pub failures: Vec<(String, ControlError)>,
}

impl BundleReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Writes the diagnostics bundle of one service.
#[derive(Clone)]
pub struct ServiceBundle {
    control: Arc<dyn ServiceControl>,
    service: ServiceRef,
}

impl ServiceBundle {
    pub fn new(control: Arc<dyn ServiceControl>, service: ServiceRef) -> Self {
        Self { control, service }
    }

    /// `{package}_{service-label}_{YYYYmmddHHMMSS}`
    pub fn directory_name(&self, at: DateTime<Utc>) -> String {
        format!(
            "{}_{}_{}",
            self.service.package,
            self.service.name.file_label(),
            at.format("%Y%m%d%H%M%S")
        )
    }

    /// Create the bundle directory under `base` and fill it.
    pub async fn create(&self, base: &Path) -> Result<BundleReport, OrchestratorError> {
        let directory = base.join(self.directory_name(Utc::now()));
        tokio::fs::create_dir_all(&directory).await?;
        info!(
            service = %self.service.name,
            directory = %directory.display(),
            "Creating service bundle"
        );

        let mut report = BundleReport {
            directory,
            files: Vec::new(),
            failures: Vec::new(),
        };

        let service = &self.service;
        let configuration = self.control.describe(service).await;
        self.collect(&mut report, "service_configuration.json", configuration)
            .await?;

        let pod_status = self.control.pod_status(service).await;
        self.collect(&mut report, "service_pod_status.json", pod_status)
            .await?;

        let deployment = self.control.deployment(service).await.and_then(to_json);
        self.collect(&mut report, "service_deployment.json", deployment)
            .await?;

        match self.control.list_plans(service).await {
            Ok(plans) => {
                for plan in plans {
                    let status = self.control.plan_status(service, &plan).await.and_then(to_json);
                    let file = format!("service_plan_status_{plan}.json");
                    self.collect(&mut report, &file, status).await?;
                }
            }
            Err(e) => {
                warn!(service = %service.name, error = %e, "Could not list plans for bundle");
                report.failures.push(("service_plan_status_*.json".to_string(), e));
            }
        }

        info!(
            service = %service.name,
            files = report.files.len(),
            failures = report.failures.len(),
            "Service bundle written"
        );
        Ok(report)
    }

    async fn collect(
        &self,
        report: &mut BundleReport,
        file: &str,
        content: Result<Value, ControlError>,
    ) -> Result<(), OrchestratorError> {
        match content {
            Ok(value) => {
                let path = report.directory.join(file);
                write_json(&path, &value).await?;
                report.files.push(path);
            }
            Err(e) => {
                warn!(service = %self.service.name, file, error = %e, "Skipping bundle file");
                report.failures.push((file.to_string(), e));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBundle")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, ControlError> {
    serde_json::to_value(value).map_err(|e| ControlError::Decode(e.to_string()))
}

async fn write_json(path: &Path, value: &Value) -> std::io::Result<()> {
    // serde_json maps are ordered, so keys come out sorted.
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    tokio::fs::write(path, bytes).await
}
