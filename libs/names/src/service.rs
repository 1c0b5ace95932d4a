//! Service names, plain or foldered.
//!
//! A plain service lives at the root of the cluster (`cassandra`). A foldered
//! service lives under a namespace path (`/test/integration/cassandra`). The
//! canonical form of a foldered name always carries a leading slash, so
//! `test/integration/cassandra` and `/test/integration/cassandra` parse to the
//! same value.

use crate::macros::validate_segment;
use crate::NameError;

const KIND: &str = "service";

fn is_service_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')
}

/// A validated service name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceName(String);

impl ServiceName {
    /// Parses a plain or foldered service name.
    pub fn parse(s: &str) -> Result<Self, NameError> {
        if s.is_empty() || s == "/" {
            return Err(NameError::Empty { kind: KIND });
        }

        let trimmed = s.strip_prefix('/').unwrap_or(s);
        if !trimmed.contains('/') {
            validate_segment(KIND, trimmed, is_service_char)?;
            return Ok(Self(trimmed.to_string()));
        }

        for segment in trimmed.split('/') {
            if segment.is_empty() {
                return Err(NameError::EmptySegment(s.to_string()));
            }
            validate_segment(KIND, segment, is_service_char)?;
        }

        Ok(Self(format!("/{trimmed}")))
    }

    /// Builds a service name under `folder`.
    ///
    /// An empty folder (or `/`) yields a plain name.
    pub fn foldered(folder: &str, name: &str) -> Result<Self, NameError> {
        let folder = folder.trim_matches('/');
        if folder.is_empty() {
            return Self::parse(name);
        }
        Self::parse(&format!("/{folder}/{name}"))
    }

    /// Returns the canonical name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the service lives under a folder.
    #[must_use]
    pub fn is_foldered(&self) -> bool {
        self.0.starts_with('/')
    }

    /// Returns the last path segment.
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Returns the folder path without the leaf, if foldered.
    #[must_use]
    pub fn folder(&self) -> Option<&str> {
        if !self.is_foldered() {
            return None;
        }
        self.0.rsplit_once('/').map(|(folder, _)| folder)
    }

    /// Returns the name without a leading slash, for use in URL paths.
    #[must_use]
    pub fn path(&self) -> &str {
        self.0.strip_prefix('/').unwrap_or(&self.0)
    }

    /// Returns the name with folder separators removed, as used in DNS labels.
    #[must_use]
    pub fn dns_label(&self) -> String {
        self.0.replace('/', "")
    }

    /// Returns a label safe for file names (`/a/b` becomes `a_b`).
    #[must_use]
    pub fn file_label(&self) -> String {
        self.path().replace('/', "_")
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ServiceName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for ServiceName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ServiceName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_name() {
        let name = ServiceName::parse("cassandra").unwrap();
        assert!(!name.is_foldered());
        assert_eq!(name.leaf(), "cassandra");
        assert_eq!(name.folder(), None);
        assert_eq!(name.path(), "cassandra");
        assert_eq!(name.dns_label(), "cassandra");
    }

    #[test]
    fn test_foldered_name() {
        let name = ServiceName::foldered("/test/integration", "cassandra").unwrap();
        assert_eq!(name.as_str(), "/test/integration/cassandra");
        assert!(name.is_foldered());
        assert_eq!(name.leaf(), "cassandra");
        assert_eq!(name.folder(), Some("/test/integration"));
        assert_eq!(name.path(), "test/integration/cassandra");
        assert_eq!(name.dns_label(), "testintegrationcassandra");
        assert_eq!(name.file_label(), "test_integration_cassandra");
    }

    #[test]
    fn test_leading_slash_is_canonical() {
        let a = ServiceName::parse("test/integration/cassandra").unwrap();
        let b = ServiceName::parse("/test/integration/cassandra").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_root_slash_on_plain_name_is_dropped() {
        let name = ServiceName::parse("/kafka").unwrap();
        assert_eq!(name.as_str(), "kafka");
        assert!(!name.is_foldered());
    }

    #[test]
    fn test_empty_folder_gives_plain_name() {
        let name = ServiceName::foldered("/", "hdfs").unwrap();
        assert_eq!(name.as_str(), "hdfs");
    }

    #[test]
    fn test_rejects_empty_segment() {
        assert!(matches!(
            ServiceName::parse("/test//cassandra"),
            Err(NameError::EmptySegment(_))
        ));
    }

    #[test]
    fn test_rejects_dot_segments() {
        assert!(matches!(
            ServiceName::parse("/test/../cassandra"),
            Err(NameError::DotSegment { .. })
        ));
        assert!(matches!(
            ServiceName::foldered("/test/.", "cassandra"),
            Err(NameError::DotSegment { .. })
        ));
        assert!(ServiceName::parse("..").is_err());
        assert!(ServiceName::parse("/test/cassandra.v2").is_ok());
    }

    #[test]
    fn test_rejects_uppercase() {
        assert!(matches!(
            ServiceName::parse("Cassandra"),
            Err(NameError::InvalidChar { ch: 'C', .. })
        ));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(ServiceName::parse("").unwrap_err().is_empty());
        assert!(ServiceName::parse("/").unwrap_err().is_empty());
    }

    proptest! {
        #[test]
        fn prop_foldered_dns_label_has_no_slash(
            folder in "[a-z][a-z0-9-]{0,10}",
            leaf in "[a-z][a-z0-9-]{0,10}",
        ) {
            let name = ServiceName::foldered(&folder, &leaf).unwrap();
            prop_assert!(!name.dns_label().contains('/'));
            prop_assert_eq!(name.leaf(), leaf.as_str());
            prop_assert_eq!(ServiceName::parse(name.as_str()).unwrap(), name);
        }
    }
}
