//! Endpoint lookup and sanitization.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use svc_reconcile::{poll_until, PollError, Probe, RetryPolicy};
use tracing::{debug, info};

use crate::control::ServiceControl;
use crate::error::{ControlError, OrchestratorError};
use crate::service::ServiceRef;

/// Connection details for one endpoint kind, with internal fields removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointDescriptor {
    pub kind: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl EndpointDescriptor {
    /// Build a descriptor from raw fields, dropping anything not meant for callers.
    pub fn from_raw(kind: impl Into<String>, raw: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            fields: sanitize(raw),
        }
    }

    /// DNS `host:port` entries, in the order the service reported them.
    pub fn dns(&self) -> Vec<&str> {
        self.string_list("dns")
    }

    /// Load-balanced address, if the endpoint has one.
    pub fn vip(&self) -> Option<&str> {
        self.fields.get("vip").and_then(Value::as_str)
    }

    /// IP `addr:port` entries.
    pub fn address(&self) -> Vec<&str> {
        self.string_list("address")
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn string_list(&self, key: &str) -> Vec<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Remove fields the service marks internal (leading `_`) and fields with no
/// value (`null`, empty string, empty array, empty object).
pub fn sanitize(raw: Map<String, Value>) -> Map<String, Value> {
    raw.into_iter()
        .filter(|(key, value)| !key.starts_with('_') && !is_blank(value))
        .collect()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Fetches sanitized endpoint descriptors.
#[derive(Clone)]
pub struct EndpointVerifier {
    control: Arc<dyn ServiceControl>,
    retry: RetryPolicy,
}

impl EndpointVerifier {
    pub fn new(control: Arc<dyn ServiceControl>, retry: RetryPolicy) -> Self {
        Self { control, retry }
    }

    /// Endpoint kinds the service exposes.
    pub async fn list_endpoints(
        &self,
        service: &ServiceRef,
    ) -> Result<Vec<String>, OrchestratorError> {
        Ok(self.control.list_endpoints(service).await?)
    }

    /// Fetch one endpoint kind.
    ///
    /// Unreachable control API calls are retried under the retry policy; an
    /// unknown kind fails immediately.
    pub async fn get_endpoint(
        &self,
        service: &ServiceRef,
        kind: &str,
    ) -> Result<EndpointDescriptor, OrchestratorError> {
        debug!(service = %service.name, kind, "Fetching endpoint");

        let control = &self.control;
        let resource = format!("endpoint {kind} on {}", service.name);
        let result = poll_until(&resource, &self.retry, || async move {
            match control.endpoint(service, kind).await {
                Ok(raw) => Ok(Probe::Ready(raw)),
                Err(e) if e.is_transient() => Ok(Probe::Pending(e.to_string())),
                Err(ControlError::NotFound(_)) => Err(OrchestratorError::EndpointNotFound {
                    service: service.name.clone(),
                    kind: kind.to_string(),
                }),
                Err(e) => Err(e.into()),
            }
        })
        .await;

        let raw = match result {
            Ok(raw) => raw,
            Err(PollError::Probe(e)) => return Err(e),
            Err(PollError::Exhausted { last_status, .. }) => {
                return Err(ControlError::Unreachable(last_status.unwrap_or_default()).into())
            }
        };

        let descriptor = EndpointDescriptor::from_raw(kind, raw);
        info!(
            service = %service.name,
            kind,
            dns = ?descriptor.dns(),
            vip = descriptor.vip().unwrap_or("-"),
            "Endpoint resolved"
        );
        Ok(descriptor)
    }
}

impl fmt::Debug for EndpointVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointVerifier")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_sanitize_drops_internal_and_blank_fields() {
        let cleaned = sanitize(raw(json!({
            "dns": ["node-0-server.cassandra.autoip.dcos.thisdcos.directory:9042"],
            "address": ["10.0.0.1:9042"],
            "vip": null,
            "_vip_raw": "node.cassandra.l4lb.thisdcos.directory:9042",
            "labels": {},
            "tags": [],
            "note": "",
            "tls": false
        })));

        let mut keys: Vec<&str> = cleaned.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["address", "dns", "tls"]);
    }

    #[test]
    fn test_descriptor_without_vip_has_no_vip_key() {
        let descriptor = EndpointDescriptor::from_raw(
            "native-client",
            raw(json!({
                "dns": ["node-0-server.cassandra.autoip.dcos.thisdcos.directory:9042"],
                "vip": ""
            })),
        );

        assert!(!descriptor.contains_key("vip"));
        assert_eq!(descriptor.vip(), None);
        assert_eq!(descriptor.dns().len(), 1);

        let json = serde_json::to_value(&descriptor).unwrap();
        assert!(json.get("vip").is_none());
        assert_eq!(json["kind"], "native-client");
    }

    #[test]
    fn test_descriptor_keeps_real_vip() {
        let descriptor = EndpointDescriptor::from_raw(
            "broker",
            raw(json!({
                "dns": ["kafka-0-broker.kafka.autoip.dcos.thisdcos.directory:1025"],
                "vip": "broker.kafka.l4lb.thisdcos.directory:9092"
            })),
        );
        assert_eq!(descriptor.vip(), Some("broker.kafka.l4lb.thisdcos.directory:9092"));
    }
}
