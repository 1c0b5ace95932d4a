//! Macros for defining typed name types.

/// Validate a single name segment.
pub fn validate_segment(
    kind: &'static str,
    s: &str,
    allow: fn(char) -> bool,
) -> Result<(), crate::NameError> {
    if s.is_empty() {
        return Err(crate::NameError::Empty { kind });
    }

    if s == "." || s == ".." {
        return Err(crate::NameError::DotSegment {
            kind,
            name: s.to_string(),
        });
    }

    let len = s.chars().count();
    if len > crate::MAX_NAME_LEN {
        return Err(crate::NameError::TooLong {
            kind,
            len,
            max: crate::MAX_NAME_LEN,
        });
    }

    if let Some(ch) = s.chars().find(|c| !allow(*c)) {
        return Err(crate::NameError::InvalidChar {
            kind,
            name: s.to_string(),
            ch,
        });
    }

    Ok(())
}

/// Characters allowed in package, plan, job, and task names.
pub fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Macro to define a typed, validated name.
///
/// This generates a newtype wrapper around `String` with:
/// - A `KIND` constant used in error messages
/// - `parse()` to validate from a string
/// - `as_str()` access
/// - `Display`, `FromStr`, and `AsRef<str>` implementations
/// - `Serialize` and `Deserialize` implementations that validate on input
///
/// # Example
///
/// ```ignore
/// define_name!(PlanName, "plan");
///
/// let plan: PlanName = "repair".parse()?;
/// ```
#[macro_export]
macro_rules! define_name {
    ($name:ident, $kind:literal) => {
        /// A validated name for this kind of resource.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// The kind label used in error messages.
            pub const KIND: &'static str = $kind;

            /// Parses and validates a name.
            pub fn parse(s: &str) -> Result<Self, $crate::NameError> {
                $crate::macros::validate_segment(Self::KIND, s, $crate::macros::is_name_char)?;
                Ok(Self(s.to_string()))
            }

            /// Returns the name as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = $crate::NameError;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
