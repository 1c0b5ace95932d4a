//! Host naming for service tasks and VIPs.

use svc_names::ServiceName;

/// Default DNS suffix for per-task auto-IP hostnames.
pub const DEFAULT_AUTOIP_SUFFIX: &str = "autoip.dcos.thisdcos.directory";

/// Default DNS suffix for load-balanced VIP hostnames.
pub const DEFAULT_VIP_SUFFIX: &str = "l4lb.thisdcos.directory";

/// Builds the hostnames a service advertises in its endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNaming {
    pub autoip_suffix: String,
    pub vip_suffix: String,
}

impl Default for HostNaming {
    fn default() -> Self {
        Self {
            autoip_suffix: DEFAULT_AUTOIP_SUFFIX.to_string(),
            vip_suffix: DEFAULT_VIP_SUFFIX.to_string(),
        }
    }
}

impl HostNaming {
    /// `{task}.{service-label}.{suffix}:{port}`
    pub fn autoip_host(&self, service: &ServiceName, task: &str, port: u16) -> String {
        format!(
            "{}.{}.{}:{}",
            task,
            service.dns_label(),
            self.autoip_suffix,
            port
        )
    }

    /// `{vip}.{service-label}.{suffix}:{port}`
    pub fn vip_host(&self, service: &ServiceName, vip: &str, port: u16) -> String {
        format!("{}.{}.{}:{}", vip, service.dns_label(), self.vip_suffix, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_autoip_host_foldered() {
        let naming = HostNaming::default();
        let service = ServiceName::parse("/test/integration/cassandra").unwrap();
        assert_eq!(
            naming.autoip_host(&service, "node-0-server", 9042),
            "node-0-server.testintegrationcassandra.autoip.dcos.thisdcos.directory:9042"
        );
    }

    #[test]
    fn test_vip_host_custom_suffix() {
        let naming = HostNaming {
            autoip_suffix: "autoip.local".into(),
            vip_suffix: "vip.local".into(),
        };
        let service = ServiceName::parse("kafka").unwrap();
        assert_eq!(naming.vip_host(&service, "broker", 9092), "broker.kafka.vip.local:9092");
    }
}
