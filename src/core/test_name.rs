//! Opaque test identifier shared by every stage of a run.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of one test in the client library's suite.
///
/// Equality is exact string equality: no case folding, no whitespace trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestName(String);

impl TestName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Top-level test this name belongs to (`TestFoo/sub` → `TestFoo`).
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.0.split_once('/').map(|(parent, _)| parent)
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TestName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TestName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TestName {
    fn from(value: String) -> Self {
        Self(value)
    }
}
