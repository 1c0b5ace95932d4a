//! Metric presence verification.
//!
//! Tasks emit metrics asynchronously and not every poll returns every metric.
//! [`MetricsVerifier::wait_for_metrics`] therefore accumulates everything
//! seen across polls into an [`EmittedMetrics`] set and hands that to the
//! caller's predicate, so "appeared at least once" is the observable
//! contract. Match semantics belong to the predicate; the usual one is
//! [`check_metrics_presence`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use svc_names::{PodName, TaskName};
use svc_reconcile::{poll_until, PollError, Probe, RetryPolicy};
use tracing::{debug, info, warn};

use crate::control::ServiceControl;
use crate::error::{ControlError, OrchestratorError};
use crate::service::ServiceRef;

/// One datapoint emitted by a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            tags: BTreeMap::new(),
        }
    }
}

/// Every metric seen so far, keeping the latest sample per name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmittedMetrics {
    samples: BTreeMap<String, MetricSample>,
}

impl EmittedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a batch of samples in.
    pub fn record<I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = MetricSample>,
    {
        for sample in samples {
            self.samples.insert(sample.name.clone(), sample);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.samples.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&MetricSample> {
        self.samples.get(name)
    }

    /// Metric names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Returns true once every expected name has been emitted.
pub fn check_metrics_presence<S: AsRef<str>>(emitted: &EmittedMetrics, expected: &[S]) -> bool {
    let missing: BTreeSet<&str> = expected
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| !emitted.contains(name))
        .collect();

    if missing.is_empty() {
        return true;
    }

    debug!(?missing, seen = emitted.len(), "Expected metrics not yet emitted");
    false
}

/// Polls a task's metrics until a predicate holds.
#[derive(Clone)]
pub struct MetricsVerifier {
    control: Arc<dyn ServiceControl>,
    poll_interval: Duration,
}

impl MetricsVerifier {
    pub fn new(control: Arc<dyn ServiceControl>, poll_interval: Duration) -> Self {
        Self {
            control,
            poll_interval,
        }
    }

    /// Poll until `predicate` accepts the accumulated metrics.
    ///
    /// A task that is not reporting yet (`NotFound`) or an unreachable control
    /// API counts as "nothing new"; other control errors abort the wait.
    pub async fn wait_for_metrics<P>(
        &self,
        service: &ServiceRef,
        pod: &PodName,
        task: &TaskName,
        timeout: Duration,
        predicate: P,
    ) -> Result<EmittedMetrics, OrchestratorError>
    where
        P: FnMut(&EmittedMetrics) -> bool + Send,
    {
        info!(service = %service.name, %pod, %task, ?timeout, "Waiting for metrics");

        let control = &self.control;
        let emitted = Mutex::new(EmittedMetrics::new());
        let predicate = Mutex::new(predicate);
        let policy = RetryPolicy::deadline(self.poll_interval, timeout);
        let resource = format!("metrics of {pod}/{task} on {}", service.name);

        let result = poll_until(&resource, &policy, || {
            let emitted = &emitted;
            let predicate = &predicate;
            async move {
                match control.task_metrics(service, pod, task).await {
                    Ok(batch) => {
                        let mut seen = emitted.lock().unwrap_or_else(PoisonError::into_inner);
                        seen.record(batch);
                    }
                    Err(ControlError::NotFound(_)) => {
                        debug!(service = %service.name, %task, "Task not reporting metrics yet");
                    }
                    Err(e) if e.is_transient() => {
                        warn!(service = %service.name, %task, error = %e, "Metrics unavailable");
                    }
                    Err(e) => return Err(OrchestratorError::from(e)),
                }

                let seen = emitted.lock().unwrap_or_else(PoisonError::into_inner);
                let mut accept = predicate.lock().unwrap_or_else(PoisonError::into_inner);
                if (*accept)(&*seen) {
                    Ok(Probe::Ready(seen.clone()))
                } else {
                    Ok(Probe::Pending(format!("{} distinct metrics", seen.len())))
                }
            }
        })
        .await;

        match result {
            Ok(metrics) => {
                info!(
                    service = %service.name,
                    %task,
                    seen = metrics.len(),
                    "Expected metrics emitted"
                );
                Ok(metrics)
            }
            Err(PollError::Probe(e)) => Err(e),
            Err(PollError::Exhausted { .. }) => {
                let seen = emitted.lock().unwrap_or_else(PoisonError::into_inner).len();
                Err(OrchestratorError::MetricsTimeout {
                    service: service.name.clone(),
                    task: format!("{pod}/{task}"),
                    timeout,
                    seen,
                })
            }
        }
    }
}

impl fmt::Debug for MetricsVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsVerifier")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
