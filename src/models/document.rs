//! Policy document chunks and the access scale they are checked against.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Confidentiality marker carried by a document chunk.
///
/// Ordered from least to most sensitive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Confidentiality {
    /// Anyone may read.
    #[default]
    Public,
    /// Internal staff with elevated clearance.
    Restricted,
    /// Named readers only.
    Confidential,
}

/// Clearance held by a session.
///
/// Uses the same three-step scale as [`Confidentiality`]: a session may see
/// a chunk iff the chunk's marker does not exceed the session's level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Public content only.
    #[default]
    Public,
    /// Public and restricted content.
    Restricted,
    /// Everything.
    Confidential,
}

impl Confidentiality {
    /// Returns all markers in ascending order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Public, Self::Restricted, Self::Confidential]
    }

    /// Returns the marker as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Restricted => "restricted",
            Self::Confidential => "confidential",
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Public => 0,
            Self::Restricted => 1,
            Self::Confidential => 2,
        }
    }
}

impl AccessLevel {
    /// Returns all levels in ascending order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Public, Self::Restricted, Self::Confidential]
    }

    /// Returns the level as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Restricted => "restricted",
            Self::Confidential => "confidential",
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Public => 0,
            Self::Restricted => 1,
            Self::Confidential => 2,
        }
    }

    /// Returns true if content with `marker` may be shown at this level.
    #[must_use]
    pub const fn permits(self, marker: Confidentiality) -> bool {
        marker.rank() <= self.rank()
    }
}

impl fmt::Display for Confidentiality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidentiality {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "restricted" | "internal" => Ok(Self::Restricted),
            "confidential" | "secret" => Ok(Self::Confidential),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown confidentiality marker: {other}"
            ))),
        }
    }
}

impl FromStr for AccessLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "restricted" | "internal" => Ok(Self::Restricted),
            "confidential" | "secret" => Ok(Self::Confidential),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown access level: {other}"
            ))),
        }
    }
}

/// A ranked snippet returned by the semantic index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Source document identifier (file stem).
    pub document_id: String,
    /// Chunk text.
    pub text: String,
    /// Confidentiality marker inherited from the source document.
    pub marker: Confidentiality,
    /// Cosine similarity to the query (0.0 to 1.0 after clamping).
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_ordering() {
        assert!(Confidentiality::Public < Confidentiality::Restricted);
        assert!(Confidentiality::Restricted < Confidentiality::Confidential);
    }

    #[test]
    fn test_permits_matrix() {
        assert!(AccessLevel::Public.permits(Confidentiality::Public));
        assert!(!AccessLevel::Public.permits(Confidentiality::Restricted));
        assert!(!AccessLevel::Public.permits(Confidentiality::Confidential));
        assert!(AccessLevel::Restricted.permits(Confidentiality::Restricted));
        assert!(!AccessLevel::Restricted.permits(Confidentiality::Confidential));
        for marker in Confidentiality::all() {
            assert!(AccessLevel::Confidential.permits(*marker));
        }
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!(
            "Restricted".parse::<AccessLevel>().unwrap(),
            AccessLevel::Restricted
        );
        assert_eq!(
            " confidential ".parse::<Confidentiality>().unwrap(),
            Confidentiality::Confidential
        );
        assert!("top-secret".parse::<AccessLevel>().is_err());
    }
}
