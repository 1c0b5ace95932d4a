//! Configuration for the orchestrator.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use svc_reconcile::{RetryPolicy, DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_WAIT};

use crate::hosts::{HostNaming, DEFAULT_AUTOIP_SUFFIX, DEFAULT_VIP_SUFFIX};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Control API URL.
    pub api_url: String,

    /// Bearer token for the control API.
    pub auth_token: Option<String>,

    /// Per-request HTTP timeout.
    pub request_timeout: Duration,

    /// Wait between convergence probes (install, upgrade, uninstall, endpoints).
    pub retry_wait: Duration,

    /// Maximum convergence probes before giving up.
    pub retry_max_attempts: u32,

    /// Interval between plan, job, and metrics probes.
    pub poll_interval: Duration,

    /// Default time to wait for a plan to complete.
    pub plan_timeout: Duration,

    /// Time to wait for a single job run.
    pub job_timeout: Duration,

    /// Default time to wait for metrics to appear.
    pub metrics_timeout: Duration,

    /// DNS suffix for per-task hostnames.
    pub autoip_suffix: String,

    /// DNS suffix for VIP hostnames.
    pub vip_suffix: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".to_string(),
            auth_token: None,
            request_timeout: Duration::from_secs(30),
            retry_wait: DEFAULT_RETRY_WAIT,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            poll_interval: Duration::from_secs(1),
            plan_timeout: Duration::from_secs(15 * 60),
            job_timeout: Duration::from_secs(10 * 60),
            metrics_timeout: Duration::from_secs(10 * 60),
            autoip_suffix: DEFAULT_AUTOIP_SUFFIX.to_string(),
            vip_suffix: DEFAULT_VIP_SUFFIX.to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = lookup("SVC_API_URL").unwrap_or(defaults.api_url);
        let auth_token = lookup("SVC_AUTH_TOKEN").filter(|t| !t.is_empty());

        let request_timeout = secs(&lookup, "SVC_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?;
        let retry_wait = millis(&lookup, "SVC_RETRY_WAIT_MS", defaults.retry_wait)?;
        let retry_max_attempts =
            parse_var(&lookup, "SVC_RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)?;
        let poll_interval = millis(&lookup, "SVC_POLL_INTERVAL_MS", defaults.poll_interval)?;
        let plan_timeout = secs(&lookup, "SVC_PLAN_TIMEOUT_SECS", defaults.plan_timeout)?;
        let job_timeout = secs(&lookup, "SVC_JOB_TIMEOUT_SECS", defaults.job_timeout)?;
        let metrics_timeout = secs(&lookup, "SVC_METRICS_TIMEOUT_SECS", defaults.metrics_timeout)?;

        let autoip_suffix = lookup("SVC_DNS_SUFFIX").unwrap_or(defaults.autoip_suffix);
        let vip_suffix = lookup("SVC_VIP_SUFFIX").unwrap_or(defaults.vip_suffix);

        Ok(Self {
            api_url,
            auth_token,
            request_timeout,
            retry_wait,
            retry_max_attempts,
            poll_interval,
            plan_timeout,
            job_timeout,
            metrics_timeout,
            autoip_suffix,
            vip_suffix,
        })
    }

    /// Policy for convergence-style waits.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::attempts(self.retry_wait, self.retry_max_attempts)
    }

    /// Policy for a deadline-bounded wait at the configured poll interval.
    pub fn deadline_policy(&self, timeout: Duration) -> RetryPolicy {
        RetryPolicy::deadline(self.poll_interval, timeout)
    }

    /// Host naming derived from the configured suffixes.
    pub fn host_naming(&self) -> HostNaming {
        HostNaming {
            autoip_suffix: self.autoip_suffix.clone(),
            vip_suffix: self.vip_suffix.clone(),
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var(lookup, key, default.as_millis() as u64).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = OrchestratorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:8080");
        assert_eq!(config.retry_wait, Duration::from_millis(1000));
        assert_eq!(config.retry_max_attempts, 5);
        assert!(config.auth_token.is_none());

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), Some(5));
    }

    #[test]
    fn test_config_overrides() {
        let config = OrchestratorConfig::from_lookup(lookup_from(&[
            ("SVC_API_URL", "https://cluster.example.com"),
            ("SVC_AUTH_TOKEN", "secret"),
            ("SVC_RETRY_WAIT_MS", "250"),
            ("SVC_RETRY_MAX_ATTEMPTS", "120"),
            ("SVC_PLAN_TIMEOUT_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "https://cluster.example.com");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.retry_wait, Duration::from_millis(250));
        assert_eq!(config.retry_max_attempts, 120);
        assert_eq!(config.plan_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_config_rejects_malformed_number() {
        let err = OrchestratorConfig::from_lookup(lookup_from(&[("SVC_JOB_TIMEOUT_SECS", "ten")]))
            .unwrap_err();
        assert!(err.to_string().contains("SVC_JOB_TIMEOUT_SECS"));
    }

    #[test]
    fn test_empty_token_ignored() {
        let config =
            OrchestratorConfig::from_lookup(lookup_from(&[("SVC_AUTH_TOKEN", "")])).unwrap();
        assert!(config.auth_token.is_none());
    }
}
