//! TOML expectation files.
//!
//! ```toml
//! suite = "gorm"
//!
//! [wildcard.blocklist]
//! TestAlwaysBroken = "unsupported feature"
//!
//! [[versions]]
//! version = "v21.1"
//! blocklist_name = "gormBlocklist21_1"
//! ignorelist_name = "gormIgnorelist21_1"
//!
//! [versions.blocklist]
//! TestUpsert = "https://github.com/cockroachdb/cockroach/issues/41234"
//!
//! [versions.ignorelist]
//! TestFlaky = "flaky"
//! ```

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DchError, Result};
use crate::core::test_name::TestName;
use crate::expectations::table::ExpectationTable;
use crate::expectations::version::{Scope, VersionKey};

/// On-disk shape of an expectation file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExpectationFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    #[serde(default, skip_serializing_if = "ListSection::is_empty")]
    pub wildcard: ListSection,
    #[serde(default)]
    pub versions: Vec<VersionSection>,
}

/// A pair of name → reason maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ListSection {
    #[serde(default)]
    pub blocklist: BTreeMap<String, String>,
    #[serde(default)]
    pub ignorelist: BTreeMap<String, String>,
}

impl ListSection {
    fn is_empty(&self) -> bool {
        self.blocklist.is_empty() && self.ignorelist.is_empty()
    }
}

/// Lists recorded for one version or release line.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VersionSection {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocklist_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignorelist_name: Option<String>,
    #[serde(default)]
    pub blocklist: BTreeMap<String, String>,
    #[serde(default)]
    pub ignorelist: BTreeMap<String, String>,
}

/// Read and build the table stored at `path`.
///
/// `default_suite` names the table when the file carries no `suite` key.
pub fn load_expectations(path: &Path, default_suite: &str) -> Result<ExpectationTable> {
    let raw = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            DchError::InvalidExpectations {
                source_name: path.display().to_string(),
                details: format!(
                    "file not found (set paths.expectations_dir or DCH_PATHS_EXPECTATIONS_DIR \
                     to the directory holding expectations/, or use an absolute path) \
                     for suite {default_suite}"
                ),
            }
        } else {
            DchError::io(path, source)
        }
    })?;
    parse_expectations(&raw, &path.display().to_string(), default_suite)
}

/// Parse an expectation file body. `source_name` only labels errors.
pub fn parse_expectations(
    raw: &str,
    source_name: &str,
    default_suite: &str,
) -> Result<ExpectationTable> {
    let invalid = |details: String| DchError::InvalidExpectations {
        source_name: source_name.to_string(),
        details,
    };

    let file: ExpectationFile = toml::from_str(raw).map_err(|e| invalid(e.to_string()))?;
    let suite = file.suite.as_deref().unwrap_or(default_suite);
    let mut builder = ExpectationTable::builder(suite);

    for (test, reason) in &file.wildcard.blocklist {
        builder = builder.block(Scope::All, checked_name(test, &invalid)?, reason.as_str());
    }
    for (test, reason) in &file.wildcard.ignorelist {
        builder = builder.ignore(Scope::All, checked_name(test, &invalid)?, reason.as_str());
    }

    let mut seen = HashSet::new();
    for section in &file.versions {
        let version = VersionKey::parse(&section.version)
            .map_err(|e| invalid(format!("versions entry: {e}")))?;
        if !seen.insert(version.clone()) {
            return Err(invalid(format!("version {version} is defined more than once")));
        }

        let blocklist_name = section
            .blocklist_name
            .clone()
            .unwrap_or_else(|| format!("{suite}-blocklist-{version}"));
        let ignorelist_name = section
            .ignorelist_name
            .clone()
            .unwrap_or_else(|| format!("{suite}-ignorelist-{version}"));
        builder = builder.version(version.clone(), blocklist_name, ignorelist_name);

        let scope = Scope::Version(version);
        for (test, reason) in &section.blocklist {
            builder = builder.block(scope.clone(), checked_name(test, &invalid)?, reason.as_str());
        }
        for (test, reason) in &section.ignorelist {
            builder = builder.ignore(scope.clone(), checked_name(test, &invalid)?, reason.as_str());
        }
    }

    Ok(builder.build())
}

/// Serialize a single-version expectation file.
pub fn render_expectation_file(file: &ExpectationFile) -> Result<String> {
    Ok(toml::to_string(file)?)
}

fn checked_name(raw: &str, invalid: &impl Fn(String) -> DchError) -> Result<TestName> {
    if raw.is_empty() {
        return Err(invalid("empty test name".to_string()));
    }
    Ok(TestName::from(raw))
}
