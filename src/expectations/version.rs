//! Target-database version keys and expectation scopes.
//!
//! A [`VersionKey`] is either a full release (`v21.1.3`, `v21.2.0-alpha.1`) or
//! a release line (`v21.1`). Keys have a total order: within a line the
//! line-level key sorts lowest, and a prerelease sorts below its release.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DchError, Result};

/// Version of the database under test, or a release line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionKey {
    major: u32,
    minor: u32,
    patch: Option<u32>,
    prerelease: Option<String>,
}

impl VersionKey {
    /// A full release key.
    #[must_use]
    pub const fn release(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch: Some(patch),
            prerelease: None,
        }
    }

    /// A release-line key covering every patch of `major.minor`.
    #[must_use]
    pub const fn line(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            patch: None,
            prerelease: None,
        }
    }

    /// Parse `[v]MAJOR.MINOR[.PATCH][-PRERELEASE][+BUILD]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |details: &str| DchError::InvalidVersion {
            raw: raw.to_string(),
            details: details.to_string(),
        };

        let trimmed = raw.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        // Build metadata never participates in ordering.
        let body = body.split_once('+').map_or(body, |(head, _)| head);
        let (numbers, prerelease) = match body.split_once('-') {
            Some((numbers, pre)) if !pre.is_empty() => (numbers, Some(pre.to_string())),
            Some(_) => return Err(invalid("empty prerelease")),
            None => (body, None),
        };

        let mut parts = numbers.split('.');
        let mut component = |name: &str| -> Result<Option<u32>> {
            parts
                .next()
                .map(|part| {
                    part.parse::<u32>()
                        .map_err(|_| invalid(&format!("{name} component {part:?} is not a number")))
                })
                .transpose()
        };

        let major = component("major")?.ok_or_else(|| invalid("missing major component"))?;
        let minor = component("minor")?.ok_or_else(|| invalid("missing minor component"))?;
        let patch = component("patch")?;
        if parts.next().is_some() {
            return Err(invalid("too many components"));
        }
        if patch.is_none() && prerelease.is_some() {
            return Err(invalid("a release line cannot carry a prerelease"));
        }

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
        })
    }

    #[must_use]
    pub const fn major(&self) -> u32 {
        self.major
    }

    #[must_use]
    pub const fn minor(&self) -> u32 {
        self.minor
    }

    #[must_use]
    pub const fn patch(&self) -> Option<u32> {
        self.patch
    }

    /// `(major, minor)` of the release line this key belongs to.
    #[must_use]
    pub const fn release_line(&self) -> (u32, u32) {
        (self.major, self.minor)
    }

    /// Whether this key names a whole release line rather than one release.
    #[must_use]
    pub const fn is_release_line(&self) -> bool {
        self.patch.is_none()
    }

    /// Whether `other` is in the same release line.
    #[must_use]
    pub fn same_line(&self, other: &Self) -> bool {
        self.release_line() == other.release_line()
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            // `None < Some(_)`: the line-level key sorts below every patch.
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => cmp_prerelease(a, b),
            })
    }
}

/// Semver precedence of dot-separated prerelease identifiers: numeric ones
/// compare as numbers and sort below alphanumeric ones, and a shorter prefix
/// sorts first. Equal precedence falls back to the raw text so the order
/// stays consistent with `Eq`.
fn cmp_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        let ord = match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match (numeric_identifier(x), numeric_identifier(y)) {
                (Some(m), Some(n)) => m.cmp(&n),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => x.cmp(y),
            },
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn numeric_identifier(id: &str) -> Option<u64> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)?;
        if let Some(patch) = self.patch {
            write!(f, ".{patch}")?;
        }
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl FromStr for VersionKey {
    type Err = DchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionKey {
    type Error = DchError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<VersionKey> for String {
    fn from(value: VersionKey) -> Self {
        value.to_string()
    }
}

/// Which versions an expectation entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Every target version.
    All,
    /// One release or release line.
    Version(VersionKey),
}

impl Scope {
    /// Parse `"*"` as [`Scope::All`], anything else as a version key.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim() == "*" {
            Ok(Self::All)
        } else {
            VersionKey::parse(raw).map(Self::Version)
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Version(v) => v.fmt(f),
        }
    }
}
