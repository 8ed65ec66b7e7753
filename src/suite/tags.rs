//! Release-tag discovery for the client library under test.
//!
//! The harness always runs against the pinned tag. The latest tag only feeds
//! an advisory telling operators that the pin can be bumped.

#![allow(missing_docs)]

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use serde::Serialize;

use crate::core::errors::{DchError, Result};

/// Default `vMAJOR.MINOR.POINT` tag pattern.
pub const DEFAULT_RELEASE_TAG_PATTERN: &str = r"^v(?P<major>\d+)\.(?P<minor>\d+)\.(?P<point>\d+)$";

/// A tag that matched the release pattern, with its numeric components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseTag {
    pub raw: String,
    pub major: u64,
    pub minor: u64,
    pub point: u64,
}

impl Ord for ReleaseTag {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.point)
            .cmp(&(other.major, other.minor, other.point))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for ReleaseTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Compiled tag pattern with `major`, `minor` and `point` capture groups.
#[derive(Debug, Clone)]
pub struct ReleaseTagPattern {
    regex: Regex,
}

impl ReleaseTagPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)?;
        for group in ["major", "minor", "point"] {
            if !regex.capture_names().flatten().any(|name| name == group) {
                return Err(DchError::InvalidConfig {
                    details: format!("release tag pattern {pattern:?} lacks a `{group}` group"),
                });
            }
        }
        Ok(Self { regex })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Parse `tag`, or `None` when it does not match.
    #[must_use]
    pub fn parse(&self, tag: &str) -> Option<ReleaseTag> {
        let caps = self.regex.captures(tag)?;
        let number = |group: &str| caps.name(group)?.as_str().parse::<u64>().ok();
        Some(ReleaseTag {
            raw: tag.to_string(),
            major: number("major")?,
            minor: number("minor")?,
            point: number("point")?,
        })
    }
}

/// Remote tag namespace (external collaborator).
pub trait TagSource {
    /// All tag names published by `repo_url`.
    fn list_tags(&self, repo_url: &str) -> Result<Vec<String>>;
}

/// Latest tag of `repo_url` matching `pattern`, compared numerically.
pub fn resolve_latest_tag(
    source: &dyn TagSource,
    repo_url: &str,
    pattern: &ReleaseTagPattern,
) -> Result<ReleaseTag> {
    let tags = source.list_tags(repo_url)?;
    tags.iter()
        .filter_map(|tag| pattern.parse(tag))
        .max()
        .ok_or_else(|| DchError::TagDiscovery {
            repo: repo_url.to_string(),
            details: format!(
                "none of {} tag(s) match {}",
                tags.len(),
                pattern.as_str()
            ),
        })
}

/// Whether `latest` is strictly newer than `pinned`.
#[must_use]
pub fn is_newer_than_pinned(latest: &ReleaseTag, pinned: &ReleaseTag) -> bool {
    (latest.major, latest.minor, latest.point) > (pinned.major, pinned.minor, pinned.point)
}

/// Advisory comparing the remote's latest release with the pinned one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TagAdvisory {
    /// The pinned tag is the latest release.
    Current { latest: String },
    /// A newer release exists; the pin can be bumped.
    NewerAvailable { latest: String },
    /// Discovery failed; the run proceeds against the pinned tag.
    Unknown { reason: String },
}

impl TagAdvisory {
    #[must_use]
    pub const fn newer_available(&self) -> bool {
        matches!(self, Self::NewerAvailable { .. })
    }
}

/// Resolve the latest tag and compare it to `pinned`, absorbing failures.
#[must_use]
pub fn advise(
    source: &dyn TagSource,
    repo_url: &str,
    pattern: &ReleaseTagPattern,
    pinned: &str,
) -> TagAdvisory {
    let latest = match resolve_latest_tag(source, repo_url, pattern) {
        Ok(latest) => latest,
        Err(err) => {
            return TagAdvisory::Unknown {
                reason: err.to_string(),
            };
        }
    };
    let Some(pinned) = pattern.parse(pinned) else {
        return TagAdvisory::Unknown {
            reason: format!("pinned tag {pinned:?} does not match {}", pattern.as_str()),
        };
    };
    if is_newer_than_pinned(&latest, &pinned) {
        TagAdvisory::NewerAvailable { latest: latest.raw }
    } else {
        TagAdvisory::Current { latest: latest.raw }
    }
}

/// Extract tag names from `git ls-remote --tags` output.
#[must_use]
pub fn parse_ls_remote(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|reference| reference.strip_prefix("refs/tags/"))
        .map(|tag| tag.strip_suffix("^{}").unwrap_or(tag).to_string())
        .collect()
}
