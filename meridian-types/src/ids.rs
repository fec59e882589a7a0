//! Object identities.
//!
//! Identities arrive from remote repositories and reference data as opaque
//! strings, so `Oid` wraps a `String` rather than a UUID. Locally created
//! objects get a UUID v7 string, which sorts by creation time.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Globally unique, immutable identity of a domain object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid(String);

impl Oid {
    /// Wraps an existing identity string.
    ///
    /// Returns `None` for empty or whitespace-only input, which the merge
    /// engine treats as a malformed record.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Option<Self> {
        let s = s.into();
        if s.trim().is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    /// Mints a fresh identity for a locally created object.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Oid {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or_else(|| crate::Error::InvalidOid(s.to_string()))
    }
}

impl From<&str> for Oid {
    /// Infallible conversion for literals and already-validated strings.
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for Oid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
