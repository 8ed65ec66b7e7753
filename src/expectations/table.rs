//! Version-keyed expectation table: which tests are expected to fail
//! (blocklist) and which are never run (ignorelist) for a target version.
//!
//! The table is immutable once built. Lookup distinguishes "no expectations
//! recorded for this version" (`None`) from "recorded, and empty". Callers must
//! treat the former as a configuration error via [`ExpectationTable::require_lists`].
//!
//! # Overlap policy
//!
//! A test present in both the blocklist and the ignorelist of a resolved
//! version is skipped: the ignorelist wins. Such tests are reported by
//! [`ExpectationLists::shadowed`] so the table can be cleaned up.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::errors::{DchError, Result};
use crate::core::test_name::TestName;
use crate::expectations::version::{Scope, VersionKey};

/// Which list an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    /// Expected to fail.
    Blocklist,
    /// Excluded from execution.
    Ignorelist,
}

/// One recorded expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectationEntry {
    pub test: TestName,
    /// Free text, usually an issue link.
    pub reason: String,
    pub scope: Scope,
    pub kind: ListKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct VersionLists {
    blocklist_name: String,
    ignorelist_name: String,
    blocklist: BTreeMap<TestName, String>,
    ignorelist: BTreeMap<TestName, String>,
}

/// Immutable store of expectations for one suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectationTable {
    suite: String,
    versions: BTreeMap<VersionKey, VersionLists>,
    wildcard_blocklist: BTreeMap<TestName, String>,
    wildcard_ignorelist: BTreeMap<TestName, String>,
}

impl ExpectationTable {
    /// Start building a table for `suite`.
    #[must_use]
    pub fn builder(suite: impl Into<String>) -> ExpectationTableBuilder {
        ExpectationTableBuilder {
            table: Self {
                suite: suite.into(),
                versions: BTreeMap::new(),
                wildcard_blocklist: BTreeMap::new(),
                wildcard_ignorelist: BTreeMap::new(),
            },
        }
    }

    #[must_use]
    pub fn suite(&self) -> &str {
        &self.suite
    }

    /// Version keys that have lists defined, ascending.
    pub fn versions(&self) -> impl Iterator<Item = &VersionKey> {
        self.versions.keys()
    }

    /// Resolve the lists that apply to `version`.
    ///
    /// Exact key first, then the nearest lower key in the same release line.
    /// Returns `None` when nothing is recorded for the line.
    #[must_use]
    pub fn lists(&self, version: &VersionKey) -> Option<ExpectationLists> {
        let (matched, lists) = self
            .versions
            .range(..=version)
            .next_back()
            .filter(|(key, _)| key.same_line(version))?;

        let mut blocklist = self.wildcard_blocklist.clone();
        blocklist.extend(lists.blocklist.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut ignorelist = self.wildcard_ignorelist.clone();
        ignorelist.extend(lists.ignorelist.iter().map(|(k, v)| (k.clone(), v.clone())));

        Some(ExpectationLists {
            suite: self.suite.clone(),
            requested: version.clone(),
            matched: matched.clone(),
            blocklist_name: lists.blocklist_name.clone(),
            ignorelist_name: lists.ignorelist_name.clone(),
            blocklist,
            ignorelist,
            version_entries: DeclaredEntries {
                blocklist: lists.blocklist.clone(),
                ignorelist: lists.ignorelist.clone(),
            },
            wildcard_entries: DeclaredEntries {
                blocklist: self.wildcard_blocklist.clone(),
                ignorelist: self.wildcard_ignorelist.clone(),
            },
        })
    }

    /// Like [`Self::lists`], but a missing entry is a fatal configuration error.
    pub fn require_lists(&self, version: &VersionKey) -> Result<ExpectationLists> {
        self.lists(version).ok_or_else(|| DchError::NoExpectations {
            suite: self.suite.clone(),
            version: version.to_string(),
        })
    }
}

/// Incremental constructor; the only way to populate an [`ExpectationTable`].
#[derive(Debug)]
pub struct ExpectationTableBuilder {
    table: ExpectationTable,
}

impl ExpectationTableBuilder {
    /// Declare `version` with explicit list names. Declaring a version with
    /// no entries records "expectations exist, and nothing is expected to fail".
    #[must_use]
    pub fn version(
        mut self,
        version: VersionKey,
        blocklist_name: impl Into<String>,
        ignorelist_name: impl Into<String>,
    ) -> Self {
        let lists = self.table.versions.entry(version).or_default();
        lists.blocklist_name = blocklist_name.into();
        lists.ignorelist_name = ignorelist_name.into();
        self
    }

    /// Record one entry. A version-scoped entry declares its version with
    /// generated list names if it was not declared yet.
    #[must_use]
    pub fn entry(mut self, entry: ExpectationEntry) -> Self {
        let ExpectationEntry {
            test,
            reason,
            scope,
            kind,
        } = entry;
        let target = match scope {
            Scope::All => match kind {
                ListKind::Blocklist => &mut self.table.wildcard_blocklist,
                ListKind::Ignorelist => &mut self.table.wildcard_ignorelist,
            },
            Scope::Version(version) => {
                let suite = &self.table.suite;
                let lists = self
                    .table
                    .versions
                    .entry(version)
                    .or_insert_with_key(|key| VersionLists {
                        blocklist_name: format!("{suite}-blocklist-{key}"),
                        ignorelist_name: format!("{suite}-ignorelist-{key}"),
                        ..VersionLists::default()
                    });
                match kind {
                    ListKind::Blocklist => &mut lists.blocklist,
                    ListKind::Ignorelist => &mut lists.ignorelist,
                }
            }
        };
        target.insert(test, reason);
        self
    }

    /// Record a blocklist entry.
    #[must_use]
    pub fn block(self, scope: Scope, test: impl Into<TestName>, reason: impl Into<String>) -> Self {
        self.entry(ExpectationEntry {
            test: test.into(),
            reason: reason.into(),
            scope,
            kind: ListKind::Blocklist,
        })
    }

    /// Record an ignorelist entry.
    #[must_use]
    pub fn ignore(
        self,
        scope: Scope,
        test: impl Into<TestName>,
        reason: impl Into<String>,
    ) -> Self {
        self.entry(ExpectationEntry {
            test: test.into(),
            reason: reason.into(),
            scope,
            kind: ListKind::Ignorelist,
        })
    }

    #[must_use]
    pub fn build(self) -> ExpectationTable {
        self.table
    }
}

/// Entries as written under one scope, before wildcard entries merge in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredEntries {
    pub blocklist: BTreeMap<TestName, String>,
    pub ignorelist: BTreeMap<TestName, String>,
}

/// The effective lists for one target version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectationLists {
    pub suite: String,
    /// Version the caller asked for.
    pub requested: VersionKey,
    /// Key the lists were resolved from.
    pub matched: VersionKey,
    pub blocklist_name: String,
    pub ignorelist_name: String,
    blocklist: BTreeMap<TestName, String>,
    ignorelist: BTreeMap<TestName, String>,
    #[serde(skip)]
    version_entries: DeclaredEntries,
    #[serde(skip)]
    wildcard_entries: DeclaredEntries,
}

impl ExpectationLists {
    #[must_use]
    pub fn is_blocklisted(&self, test: &TestName) -> bool {
        self.blocklist.contains_key(test)
    }

    #[must_use]
    pub fn is_ignored(&self, test: &TestName) -> bool {
        self.ignorelist.contains_key(test)
    }

    /// Recorded reason for an expected failure.
    #[must_use]
    pub fn blocklist_reason(&self, test: &TestName) -> Option<&str> {
        self.blocklist.get(test).map(String::as_str)
    }

    #[must_use]
    pub fn blocklist(&self) -> &BTreeMap<TestName, String> {
        &self.blocklist
    }

    #[must_use]
    pub fn ignorelist(&self) -> &BTreeMap<TestName, String> {
        &self.ignorelist
    }

    /// Entries declared for [`Self::matched`] itself.
    #[must_use]
    pub fn version_entries(&self) -> &DeclaredEntries {
        &self.version_entries
    }

    /// Entries declared for every version of the suite.
    #[must_use]
    pub fn wildcard_entries(&self) -> &DeclaredEntries {
        &self.wildcard_entries
    }

    /// Tests listed in both lists; they resolve to skipped.
    #[must_use]
    pub fn shadowed(&self) -> Vec<TestName> {
        self.blocklist
            .keys()
            .filter(|name| self.ignorelist.contains_key(*name))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(raw: &str) -> VersionKey {
        VersionKey::parse(raw).unwrap()
    }

    fn at(raw: &str) -> Scope {
        Scope::Version(v(raw))
    }

    fn sample() -> ExpectationTable {
        ExpectationTable::builder("gorm")
            .version(v("v20.2"), "gormBlocklist20_2", "gormIgnorelist20_2")
            .version(v("v21.1"), "gormBlocklist21_1", "gormIgnorelist21_1")
            .version(v("v21.1.5"), "gormBlocklist21_1_5", "gormIgnorelist21_1_5")
            .block(at("v20.2"), "TestOld", "#1234")
            .block(at("v21.1"), "TestUpsert", "#41234")
            .block(at("v21.1.5"), "TestSavepoint", "#50000")
            .ignore(at("v21.1"), "TestFlaky", "flaky")
            .block(Scope::All, "TestAlwaysBroken", "unsupported")
            .build()
    }

    #[test]
    fn exact_match_wins() {
        let lists = sample().lists(&v("v21.1.5")).unwrap();
        assert_eq!(lists.matched, v("v21.1.5"));
        assert_eq!(lists.blocklist_name, "gormBlocklist21_1_5");
        assert!(lists.is_blocklisted(&"TestSavepoint".into()));
        assert!(!lists.is_blocklisted(&"TestUpsert".into()));
    }

    #[test]
    fn later_prerelease_falls_back_to_nearest_prerelease() {
        let table = ExpectationTable::builder("gorm")
            .version(v("v21.2"), "gormBlocklist21_2", "gormIgnorelist21_2")
            .version(v("v21.2.0-beta.9"), "gormBlocklistBeta9", "gormIgnorelistBeta9")
            .build();
        let lists = table.lists(&v("v21.2.0-beta.10")).unwrap();
        assert_eq!(lists.matched, v("v21.2.0-beta.9"));
        assert_eq!(lists.blocklist_name, "gormBlocklistBeta9");
    }

    #[test]
    fn falls_back_to_nearest_lower_in_line() {
        let table = sample();
        let lists = table.lists(&v("v21.1.9")).unwrap();
        assert_eq!(lists.matched, v("v21.1.5"));
        assert_eq!(lists.requested, v("v21.1.9"));

        let lists = table.lists(&v("v21.1.3")).unwrap();
        assert_eq!(lists.matched, v("v21.1"));
        assert_eq!(lists.blocklist_name, "gormBlocklist21_1");
    }

    #[test]
    fn never_crosses_release_lines() {
        let table = sample();
        assert!(table.lists(&v("v21.2.0")).is_none());
        // v20.2 is lower but belongs to another line.
        assert!(table.lists(&v("v21.0.1")).is_none());
    }

    #[test]
    fn require_lists_reports_configuration_error() {
        let err = sample().require_lists(&v("v22.1.0")).unwrap_err();
        assert_eq!(err.code(), "DCH-1101");
        assert!(err.is_configuration());
    }

    #[test]
    fn declared_empty_version_is_not_absent() {
        let table = ExpectationTable::builder("lib/pq")
            .version(v("v21.2"), "libPQBlocklist21_2", "libPQIgnorelist21_2")
            .build();
        let lists = table.lists(&v("v21.2.4")).unwrap();
        assert!(lists.blocklist().is_empty());
        assert!(lists.ignorelist().is_empty());
    }

    #[test]
    fn wildcard_entries_merge_but_do_not_define_versions() {
        let table = sample();
        let lists = table.lists(&v("v21.1.0")).unwrap();
        assert_eq!(
            lists.blocklist_reason(&"TestAlwaysBroken".into()),
            Some("unsupported")
        );

        let only_wildcard = ExpectationTable::builder("gorm")
            .block(Scope::All, "TestX", "x")
            .build();
        assert!(only_wildcard.lists(&v("v21.1.0")).is_none());
    }

    #[test]
    fn version_reason_overrides_wildcard_reason() {
        let table = ExpectationTable::builder("gorm")
            .block(Scope::All, "TestX", "generic")
            .block(at("v21.1"), "TestX", "specific")
            .build();
        let lists = table.lists(&v("v21.1.2")).unwrap();
        assert_eq!(lists.blocklist_reason(&"TestX".into()), Some("specific"));
    }

    #[test]
    fn declared_entries_keep_their_scope() {
        let lists = sample().lists(&v("v21.1.0")).unwrap();
        let wildcard: &TestName = &"TestAlwaysBroken".into();
        assert!(lists.is_blocklisted(wildcard));
        assert!(lists.wildcard_entries().blocklist.contains_key(wildcard));
        assert!(!lists.version_entries().blocklist.contains_key(wildcard));
    }

    #[test]
    fn undeclared_version_gets_generated_names() {
        let table = ExpectationTable::builder("gorm")
            .block(at("v21.2"), "TestX", "x")
            .build();
        let lists = table.lists(&v("v21.2.0")).unwrap();
        assert_eq!(lists.blocklist_name, "gorm-blocklist-v21.2");
        assert_eq!(lists.ignorelist_name, "gorm-ignorelist-v21.2");
    }

    #[test]
    fn shadowed_reports_overlap() {
        let table = ExpectationTable::builder("gorm")
            .block(at("v21.1"), "TestBoth", "fails")
            .ignore(at("v21.1"), "TestBoth", "flaky")
            .block(at("v21.1"), "TestOnlyBlocked", "fails")
            .build();
        let lists = table.lists(&v("v21.1.0")).unwrap();
        assert_eq!(lists.shadowed(), vec![TestName::from("TestBoth")]);
        assert!(lists.is_ignored(&"TestBoth".into()));
    }
}
