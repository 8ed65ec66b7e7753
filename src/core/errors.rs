//! DCH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DchError>;

/// Top-level error type for the compatibility harness.
///
/// Expected test failures are never represented here; they are verdicts.
#[derive(Debug, Error)]
pub enum DchError {
    #[error("[DCH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DCH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DCH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DCH-1101] no expectations recorded for suite {suite} at version {version}")]
    NoExpectations { suite: String, version: String },

    #[error("[DCH-1102] invalid expectation table {source_name}: {details}")]
    InvalidExpectations {
        source_name: String,
        details: String,
    },

    #[error("[DCH-1103] unknown suite: {name}")]
    UnknownSuite { name: String },

    #[error("[DCH-1104] suite {suite} requires target version >= {min_version}, got {version}")]
    SuiteNotApplicable {
        suite: String,
        min_version: String,
        version: String,
    },

    #[error("[DCH-1201] invalid version {raw:?}: {details}")]
    InvalidVersion { raw: String, details: String },

    #[error("[DCH-2001] tag discovery failed for {repo}: {details}")]
    TagDiscovery { repo: String, details: String },

    #[error("[DCH-2101] duplicate test name in discovery: {name}")]
    DuplicateTestName { name: String },

    #[error("[DCH-2102] {} discovered test(s) have neither an outcome nor an ignorelist entry: {}", .missing.len(), .missing.join(", "))]
    SelectionInconsistency { missing: Vec<String> },

    #[error("[DCH-2103] malformed runner output: {details}")]
    RunnerOutput { details: String },

    #[error("[DCH-2104] run aborted before completion: {reason}")]
    RunAborted { reason: String },

    #[error("[DCH-3001] {step} failed: {details}")]
    Collaborator {
        step: &'static str,
        details: String,
    },

    #[error("[DCH-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DCH-3101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },
}

impl DchError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DCH-1001",
            Self::MissingConfig { .. } => "DCH-1002",
            Self::ConfigParse { .. } => "DCH-1003",
            Self::NoExpectations { .. } => "DCH-1101",
            Self::InvalidExpectations { .. } => "DCH-1102",
            Self::UnknownSuite { .. } => "DCH-1103",
            Self::SuiteNotApplicable { .. } => "DCH-1104",
            Self::InvalidVersion { .. } => "DCH-1201",
            Self::TagDiscovery { .. } => "DCH-2001",
            Self::DuplicateTestName { .. } => "DCH-2101",
            Self::SelectionInconsistency { .. } => "DCH-2102",
            Self::RunnerOutput { .. } => "DCH-2103",
            Self::RunAborted { .. } => "DCH-2104",
            Self::Collaborator { .. } => "DCH-3001",
            Self::Io { .. } => "DCH-3002",
            Self::Serialization { .. } => "DCH-3101",
        }
    }

    /// Whether the error must abort the run.
    ///
    /// Tag discovery is the only condition absorbed into the run: it downgrades
    /// to an unknown-latest-tag advisory.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::TagDiscovery { .. })
    }

    /// Whether the error stems from configuration or expectation data rather
    /// than from the environment.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::NoExpectations { .. }
                | Self::InvalidExpectations { .. }
                | Self::UnknownSuite { .. }
                | Self::SuiteNotApplicable { .. }
                | Self::InvalidVersion { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for a failed external step.
    #[must_use]
    pub fn collaborator(step: &'static str, details: impl Into<String>) -> Self {
        Self::Collaborator {
            step,
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for DchError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DchError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for DchError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<regex::Error> for DchError {
    fn from(value: regex::Error) -> Self {
        Self::InvalidConfig {
            details: format!("invalid regex: {value}"),
        }
    }
}
