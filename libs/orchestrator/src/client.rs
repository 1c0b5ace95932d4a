//! HTTP clients for the Service Control API and the job backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use svc_names::{JobName, PlanName, PodName, TaskName};
use tracing::debug;

use crate::config::OrchestratorConfig;
use crate::control::{DeploymentStatus, PlanParameters, PlatformInfo, ServiceControl};
use crate::error::ControlError;
use crate::jobs::{Job, JobBackend, JobKind, JobRunStatus};
use crate::metrics::MetricSample;
use crate::plan::PlanStatus;
use crate::service::ServiceRef;

/// JSON client for the cluster API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client from configuration.
    pub fn new(config: &OrchestratorConfig) -> Result<Self, ControlError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &config.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ControlError::Client(format!("invalid token format: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let base_url = Url::parse(&config.api_url).map_err(|e| {
            ControlError::Client(format!("invalid API URL {:?}: {e}", config.api_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ControlError::Client(format!(
                "API URL {:?} cannot carry a path",
                config.api_url
            )));
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ControlError::Client(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// GET and decode.
    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ControlError> {
        let url = self.url(segments);
        debug!(method = "GET", path = url.path(), "Control API request");
        let response = self.client.get(url).send().await?;
        self.handle_response(response).await
    }

    /// POST a JSON body and decode the response.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ControlError> {
        let url = self.url(segments);
        debug!(method = "POST", path = url.path(), "Control API request");
        let response = self.client.post(url).json(body).send().await?;
        self.handle_response(response).await
    }

    /// POST a JSON body, ignoring any response body.
    pub async fn post_unit<B: Serialize>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<(), ControlError> {
        let url = self.url(segments);
        debug!(method = "POST", path = url.path(), "Control API request");
        let response = self.client.post(url).json(body).send().await?;
        self.handle_empty(response).await
    }

    /// PUT a JSON body, ignoring any response body.
    pub async fn put_unit<B: Serialize>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<(), ControlError> {
        let url = self.url(segments);
        debug!(method = "PUT", path = url.path(), "Control API request");
        let response = self.client.put(url).json(body).send().await?;
        self.handle_empty(response).await
    }

    /// DELETE a resource.
    pub async fn delete(&self, segments: &[&str]) -> Result<(), ControlError> {
        let url = self.url(segments);
        debug!(method = "DELETE", path = url.path(), "Control API request");
        let response = self.client.delete(url).send().await?;
        self.handle_empty(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ControlError> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| ControlError::Decode(e.to_string()))
        } else {
            self.handle_error(response).await
        }
    }

    async fn handle_empty(&self, response: reqwest::Response) -> Result<(), ControlError> {
        if response.status().is_success() {
            Ok(())
        } else {
            self.handle_error(response).await
        }
    }

    /// Map an error response onto [`ControlError`].
    async fn handle_error<T>(&self, response: reqwest::Response) -> Result<T, ControlError> {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        let message = serde_json::from_str::<ApiErrorResponse>(&text)
            .map(|body| body.message)
            .ok()
            .filter(|m| !m.is_empty())
            .or_else(|| Some(text.trim().to_string()).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| status.to_string());

        Err(status_error(status, message))
    }
}

/// Classify a non-success status code.
pub fn status_error(status: StatusCode, message: String) -> ControlError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ControlError::Unauthorized(message),
        StatusCode::NOT_FOUND => ControlError::NotFound(message),
        StatusCode::CONFLICT => ControlError::Conflict(message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ControlError::Unreachable(message)
        }
        other => ControlError::rejected(other.as_u16(), message),
    }
}

/// Error body returned by the control API (`{"code": ..., "message": ...}`).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageRequest<'a> {
    package_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    package_version: Option<&'a str>,
    app_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a Value>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
struct MetricsResponse {
    #[serde(default)]
    datapoints: Vec<MetricSample>,
}

/// [`ServiceControl`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpServiceControl {
    api: ApiClient,
}

impl HttpServiceControl {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// `/service/{folder/.../name}/v1/{rest...}`
    fn service_path<'a>(service: &'a ServiceRef, rest: &[&'a str]) -> Vec<&'a str> {
        let mut segments = vec!["service"];
        segments.extend(service.name.path().split('/'));
        segments.push("v1");
        segments.extend_from_slice(rest);
        segments
    }
}

#[async_trait]
impl ServiceControl for HttpServiceControl {
    async fn platform_info(&self) -> Result<PlatformInfo, ControlError> {
        let body: VersionResponse = self.api.get(&["platform", "version"]).await?;
        PlatformInfo::parse(&body.version)
            .map_err(|e| ControlError::Decode(format!("platform version {:?}: {e}", body.version)))
    }

    async fn install(
        &self,
        service: &ServiceRef,
        version: Option<&str>,
        options: &Value,
    ) -> Result<(), ControlError> {
        let request = PackageRequest {
            package_name: service.package.as_str(),
            package_version: version,
            app_id: service.name.as_str(),
            options: Some(options).filter(|o| !o.is_null()),
        };
        self.api.post_unit(&["package", "install"], &request).await
    }

    async fn uninstall(&self, service: &ServiceRef) -> Result<(), ControlError> {
        let request = PackageRequest {
            package_name: service.package.as_str(),
            package_version: None,
            app_id: service.name.as_str(),
            options: None,
        };
        self.api.post_unit(&["package", "uninstall"], &request).await
    }

    async fn update(
        &self,
        service: &ServiceRef,
        version: &str,
        options: &Value,
    ) -> Result<(), ControlError> {
        let request = PackageRequest {
            package_name: service.package.as_str(),
            package_version: Some(version),
            app_id: service.name.as_str(),
            options: Some(options).filter(|o| !o.is_null()),
        };
        self.api.post_unit(&["package", "update"], &request).await
    }

    async fn deployment(
        &self,
        service: &ServiceRef,
    ) -> Result<Option<DeploymentStatus>, ControlError> {
        match self.api.get(&Self::service_path(service, &["deployment"])).await {
            Ok(status) => Ok(Some(status)),
            Err(ControlError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_plans(&self, service: &ServiceRef) -> Result<Vec<PlanName>, ControlError> {
        self.api.get(&Self::service_path(service, &["plans"])).await
    }

    async fn start_plan(
        &self,
        service: &ServiceRef,
        plan: &PlanName,
        parameters: &PlanParameters,
    ) -> Result<(), ControlError> {
        let path = Self::service_path(service, &["plans", plan.as_str(), "start"]);
        self.api.post_unit(&path, parameters).await
    }

    async fn plan_status(
        &self,
        service: &ServiceRef,
        plan: &PlanName,
    ) -> Result<PlanStatus, ControlError> {
        self.api
            .get(&Self::service_path(service, &["plans", plan.as_str()]))
            .await
    }

    async fn list_endpoints(&self, service: &ServiceRef) -> Result<Vec<String>, ControlError> {
        self.api.get(&Self::service_path(service, &["endpoints"])).await
    }

    async fn endpoint(
        &self,
        service: &ServiceRef,
        kind: &str,
    ) -> Result<Map<String, Value>, ControlError> {
        // Dot segments would address a different route.
        if matches!(kind, "" | "." | "..") {
            return Err(ControlError::NotFound(format!("endpoint {kind:?}")));
        }
        self.api
            .get(&Self::service_path(service, &["endpoints", kind]))
            .await
    }

    async fn task_metrics(
        &self,
        service: &ServiceRef,
        pod: &PodName,
        task: &TaskName,
    ) -> Result<Vec<MetricSample>, ControlError> {
        let path = Self::service_path(service, &["metrics", pod.as_str(), task.as_str()]);
        let body: MetricsResponse = self.api.get(&path).await?;
        Ok(body.datapoints)
    }

    async fn describe(&self, service: &ServiceRef) -> Result<Value, ControlError> {
        self.api
            .get(&Self::service_path(service, &["configurations", "target"]))
            .await
    }

    async fn pod_status(&self, service: &ServiceRef) -> Result<Value, ControlError> {
        self.api
            .get(&Self::service_path(service, &["pod", "status"]))
            .await
    }
}

#[derive(Debug, Serialize)]
struct JobSpec<'a> {
    name: &'a JobName,
    kind: JobKind,
    target: &'a str,
    parameters: &'a BTreeMap<String, String>,
    command: &'a str,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    id: String,
}

/// [`JobBackend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpJobBackend {
    api: ApiClient,
}

impl HttpJobBackend {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl JobBackend for HttpJobBackend {
    async fn put_job(&self, job: &Job) -> Result<(), ControlError> {
        let spec = JobSpec {
            name: &job.name,
            kind: job.kind,
            target: &job.target,
            parameters: &job.parameters,
            command: job.effective_command(),
        };
        self.api
            .put_unit(&["jobs", "v1", "jobs", job.name.as_str()], &spec)
            .await
    }

    async fn delete_job(&self, name: &JobName) -> Result<(), ControlError> {
        self.api
            .delete(&["jobs", "v1", "jobs", name.as_str()])
            .await
    }

    async fn start_run(&self, name: &JobName) -> Result<String, ControlError> {
        let run: RunResponse = self
            .api
            .post(&["jobs", "v1", "jobs", name.as_str(), "runs"], &Value::Null)
            .await?;
        Ok(run.id)
    }

    async fn run_status(&self, name: &JobName, run_id: &str) -> Result<JobRunStatus, ControlError> {
        self.api
            .get(&["jobs", "v1", "jobs", name.as_str(), "runs", run_id])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let config = OrchestratorConfig {
            api_url: "https://cluster.example.com/".into(),
            ..OrchestratorConfig::default()
        };
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(
            client.url(&["platform", "version"]).as_str(),
            "https://cluster.example.com/platform/version"
        );
    }

    #[test]
    fn test_url_keeps_base_path_and_encodes_segments() {
        let config = OrchestratorConfig {
            api_url: "https://cluster.example.com/api".into(),
            ..OrchestratorConfig::default()
        };
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(
            client.url(&["endpoints", "native/client?x"]).as_str(),
            "https://cluster.example.com/api/endpoints/native%2Fclient%3Fx"
        );
    }

    #[test]
    fn test_invalid_api_url_is_client_error() {
        let config = OrchestratorConfig {
            api_url: "cluster.example.com".into(),
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            ApiClient::new(&config),
            Err(ControlError::Client(_))
        ));
    }

    #[test]
    fn test_foldered_service_path() {
        let service = ServiceRef::parse("cassandra", "/test/integration/cassandra").unwrap();
        assert_eq!(
            HttpServiceControl::service_path(&service, &["plans"]),
            vec!["service", "test", "integration", "cassandra", "v1", "plans"]
        );
    }

    #[test]
    fn test_status_mapping() {
        let msg = || "boom".to_string();
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, msg()),
            ControlError::Unauthorized(_)
        ));
        assert!(status_error(StatusCode::NOT_FOUND, msg()).is_not_found());
        assert!(matches!(
            status_error(StatusCode::CONFLICT, msg()),
            ControlError::Conflict(_)
        ));
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, msg()).is_transient());
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, msg()),
            ControlError::Rejected { status: 400, .. }
        ));
    }
}
