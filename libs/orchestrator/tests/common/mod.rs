//! Shared helpers for orchestrator integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use svc_orchestrator::{OrchestratorContext, ServiceRef};
use svc_testing::{test_config, FakeCluster};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,svc_orchestrator=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn cassandra() -> ServiceRef {
    ServiceRef::parse("cassandra", "cassandra").unwrap()
}

pub fn foldered_cassandra() -> ServiceRef {
    ServiceRef::foldered("cassandra", "/test/integration", "cassandra").unwrap()
}

/// Wrap a fake and build a context over it.
pub fn setup(fake: FakeCluster) -> (Arc<FakeCluster>, OrchestratorContext) {
    init_tracing();
    let fake = Arc::new(fake);
    let ctx = fake.context(test_config());
    (fake, ctx)
}
