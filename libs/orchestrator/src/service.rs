//! Service references.

use std::fmt;

use serde::{Deserialize, Serialize};
use svc_names::{NameError, PackageName, ServiceName};

/// Identifies a deployed service instance by package and service name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRef {
    pub package: PackageName,
    pub name: ServiceName,
}

impl ServiceRef {
    /// Create a reference from already-validated names.
    pub fn new(package: PackageName, name: ServiceName) -> Self {
        Self { package, name }
    }

    /// Parse and validate both names.
    pub fn parse(package: &str, name: &str) -> Result<Self, NameError> {
        Ok(Self {
            package: PackageName::parse(package)?,
            name: ServiceName::parse(name)?,
        })
    }

    /// Reference to a service of `package` installed under `folder`.
    pub fn foldered(package: &str, folder: &str, name: &str) -> Result<Self, NameError> {
        Ok(Self {
            package: PackageName::parse(package)?,
            name: ServiceName::foldered(folder, name)?,
        })
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.package)
    }
}
