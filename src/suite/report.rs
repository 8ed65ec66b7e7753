//! Render a [`RunSummary`] for humans, machines and the next blocklist edit.
//!
//! Every body is a pure function of its inputs: no timestamps, no hash-map
//! iteration order. Two renders of the same summary are byte-identical, which
//! is what [`digest`] relies on.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::errors::{DchError, Result};
use crate::core::test_name::TestName;
use crate::expectations::loader::{
    ExpectationFile, ListSection, VersionSection, render_expectation_file,
};
use crate::expectations::table::ExpectationLists;
use crate::suite::reconcile::{RunSummary, Verdict};
use crate::suite::tags::TagAdvisory;

/// Reason recorded for regressions in the suggested blocklist.
pub const NEW_FAILURE_REASON: &str = "new failure";

pub const TEXT_REPORT_FILE: &str = "summary.txt";
pub const JSON_REPORT_FILE: &str = "summary.json";
pub const SUGGESTED_BLOCKLIST_FILE: &str = "blocklist.suggested.toml";

/// Plain-text report.
#[must_use]
pub fn render_text(summary: &RunSummary) -> String {
    let ctx = &summary.context;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "suite {} at {} (expectations {})",
        ctx.suite, ctx.target_version, ctx.expectations_version
    );
    let _ = writeln!(
        out,
        "using blocklist {}, using ignorelist {}",
        ctx.blocklist_name, ctx.ignorelist_name
    );
    if let Some(pinned) = &ctx.pinned_tag {
        let advisory = match &ctx.tag_advisory {
            Some(TagAdvisory::Current { .. }) => "latest".to_string(),
            Some(TagAdvisory::NewerAvailable { latest }) => {
                format!("newer release available: {latest}")
            }
            Some(TagAdvisory::Unknown { reason }) => format!("latest unknown: {reason}"),
            None => "latest not checked".to_string(),
        };
        let _ = writeln!(out, "library {pinned} ({advisory})");
    }
    out.push('\n');

    for verdict in Verdict::ALL {
        let _ = writeln!(out, "{:<18}{:>6}", verdict.label(), summary.counts.get(verdict));
    }
    let _ = writeln!(out, "{:<18}{:>6}", "total", summary.counts.total());

    if !summary.regressions.is_empty() {
        let _ = writeln!(out, "\nregressions (not in {}):", ctx.blocklist_name);
        for regression in &summary.regressions {
            match regression.annotation {
                Some(annotation) => {
                    let _ = writeln!(out, "  {} ({annotation})", regression.test);
                }
                None => {
                    let _ = writeln!(out, "  {}", regression.test);
                }
            }
        }
    }

    if !summary.newly_fixed.is_empty() {
        let _ = writeln!(out, "\nnewly fixed (stale entries in {}):", ctx.blocklist_name);
        for fixed in &summary.newly_fixed {
            let _ = write!(out, "  {}", fixed.test);
            if !fixed.stale_reason.is_empty() {
                let _ = write!(out, " [{}]", fixed.stale_reason);
            }
            if let Some(annotation) = fixed.annotation {
                let _ = write!(out, " ({annotation})");
            }
            out.push('\n');
        }
    }

    let other_annotated: Vec<_> = summary
        .annotated
        .iter()
        .filter(|a| a.verdict != Verdict::UnexpectedFail && a.verdict != Verdict::UnexpectedPass)
        .collect();
    if !other_annotated.is_empty() {
        out.push_str("\nannotated:\n");
        for annotated in other_annotated {
            let _ = writeln!(
                out,
                "  {} ({}, {})",
                annotated.test, annotated.verdict, annotated.annotation
            );
        }
    }

    if !summary.stale_blocklist.is_empty() {
        out.push_str("\nblocklist entries not discovered:\n");
        for name in &summary.stale_blocklist {
            let _ = writeln!(out, "  {name}");
        }
    }

    if !summary.shadowed.is_empty() {
        out.push_str("\nlisted in both lists (skipped):\n");
        for name in &summary.shadowed {
            let _ = writeln!(out, "  {name}");
        }
    }

    let regressions = summary.regressions.len();
    if regressions == 0 {
        out.push_str("\nresult: PASS\n");
    } else {
        let plural = if regressions == 1 { "" } else { "s" };
        let _ = writeln!(out, "\nresult: FAIL ({regressions} regression{plural})");
    }
    out
}

/// Pretty JSON report.
pub fn render_json(summary: &RunSummary) -> Result<String> {
    let mut body = serde_json::to_string_pretty(summary)?;
    body.push('\n');
    Ok(body)
}

/// TOML snippet for the resolved version: its own blocklist minus newly
/// fixed tests, plus regressions recorded as [`NEW_FAILURE_REASON`].
///
/// Wildcard entries stay in `[wildcard]`. A newly fixed wildcard entry is
/// dropped there too, with a leading comment since the edit reaches every
/// version of the suite.
pub fn suggested_blocklist(summary: &RunSummary, lists: &ExpectationLists) -> Result<String> {
    let version = lists.version_entries();
    let wildcard = lists.wildcard_entries();

    let mut blocklist = named(&version.blocklist);
    let mut wildcard_blocklist = named(&wildcard.blocklist);
    let mut notes = String::new();
    for fixed in &summary.newly_fixed {
        blocklist.remove(fixed.test.as_str());
        if wildcard_blocklist.remove(fixed.test.as_str()).is_some() {
            let _ = writeln!(
                notes,
                "# {} passed at {}; its [wildcard.blocklist] entry applies to every version",
                fixed.test, lists.requested
            );
        }
    }
    for regression in &summary.regressions {
        blocklist
            .entry(regression.test.to_string())
            .or_insert_with(|| NEW_FAILURE_REASON.to_string());
    }

    let file = ExpectationFile {
        suite: Some(lists.suite.clone()),
        wildcard: ListSection {
            blocklist: wildcard_blocklist,
            ignorelist: named(&wildcard.ignorelist),
        },
        versions: vec![VersionSection {
            version: lists.matched.to_string(),
            blocklist_name: Some(lists.blocklist_name.clone()),
            ignorelist_name: Some(lists.ignorelist_name.clone()),
            blocklist,
            ignorelist: named(&version.ignorelist),
        }],
    };
    Ok(notes + &render_expectation_file(&file)?)
}

fn named(entries: &BTreeMap<TestName, String>) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(name, reason)| (name.to_string(), reason.clone()))
        .collect()
}

/// SHA-256 of `body`, lowercase hex.
#[must_use]
pub fn digest(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

/// Paths and digest of a written report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenReport {
    pub text: PathBuf,
    pub json: PathBuf,
    pub suggested_blocklist: PathBuf,
    /// Digest of the text body.
    pub digest: String,
}

/// Write the three report files into `dir`, creating it if needed.
pub fn write_report(
    dir: &Path,
    summary: &RunSummary,
    lists: &ExpectationLists,
) -> Result<WrittenReport> {
    fs::create_dir_all(dir).map_err(|source| DchError::io(dir, source))?;

    let text = render_text(summary);
    let json = render_json(summary)?;
    let suggested = suggested_blocklist(summary, lists)?;

    let write = |name: &str, body: &str| -> Result<PathBuf> {
        let path = dir.join(name);
        fs::write(&path, body).map_err(|source| DchError::io(&path, source))?;
        Ok(path)
    };

    Ok(WrittenReport {
        text: write(TEXT_REPORT_FILE, &text)?,
        json: write(JSON_REPORT_FILE, &json)?,
        suggested_blocklist: write(SUGGESTED_BLOCKLIST_FILE, &suggested)?,
        digest: digest(&text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectations::loader::parse_expectations;
    use crate::expectations::table::ExpectationTable;
    use crate::expectations::version::{Scope, VersionKey};
    use crate::suite::outcome::ObservedOutcome;
    use crate::suite::reconcile::reconcile;

    fn fixture() -> (RunSummary, ExpectationLists) {
        let line = VersionKey::line(21, 1);
        let scope = Scope::Version(line.clone());
        let lists = ExpectationTable::builder("gorm")
            .version(line, "gormBlocklist21_1", "gormIgnorelist21_1")
            .block(scope.clone(), "TestFixed", "#41234")
            .block(scope.clone(), "TestStillBroken", "#50000")
            .block(scope.clone(), "TestRemoved", "#1")
            .ignore(scope, "TestFlaky", "flaky")
            .build()
            .lists(&VersionKey::release(21, 1, 3))
            .unwrap();
        let outcomes = [
            ("TestOk", ObservedOutcome::pass()),
            ("TestFixed", ObservedOutcome::pass()),
            ("TestStillBroken", ObservedOutcome::fail()),
            ("TestNew", ObservedOutcome::did_not_complete()),
        ]
        .into_iter()
        .map(|(name, observed)| (TestName::from(name), observed))
        .collect();
        let discovered: Vec<TestName> = ["TestOk", "TestFixed", "TestStillBroken", "TestNew", "TestFlaky"]
            .into_iter()
            .map(TestName::from)
            .collect();
        let summary = reconcile(&outcomes, &lists, &discovered).unwrap();
        (summary, lists)
    }

    #[test]
    fn text_report_lists_regressions_and_fixes() {
        let (summary, _) = fixture();
        let text = render_text(&summary);
        assert!(text.starts_with("suite gorm at v21.1.3 (expectations v21.1)\n"));
        assert!(text.contains("using blocklist gormBlocklist21_1, using ignorelist gormIgnorelist21_1"));
        assert!(text.contains("regressions (not in gormBlocklist21_1):\n  TestNew (did not complete)"));
        assert!(text.contains("  TestFixed [#41234]"));
        assert!(text.contains("blocklist entries not discovered:\n  TestRemoved"));
        assert!(text.ends_with("result: FAIL (1 regression)\n"));
    }

    #[test]
    fn text_report_shows_library_advisory() {
        let (summary, _) = fixture();
        let summary = summary.with_library(
            "v1.21.8",
            TagAdvisory::NewerAvailable {
                latest: "v1.21.9".to_string(),
            },
        );
        let text = render_text(&summary);
        assert!(text.contains("library v1.21.8 (newer release available: v1.21.9)"));
    }

    #[test]
    fn renders_are_deterministic() {
        let (summary, lists) = fixture();
        assert_eq!(render_text(&summary), render_text(&summary));
        assert_eq!(render_json(&summary).unwrap(), render_json(&summary).unwrap());
        assert_eq!(
            suggested_blocklist(&summary, &lists).unwrap(),
            suggested_blocklist(&summary, &lists).unwrap()
        );
        assert_eq!(digest(&render_text(&summary)), digest(&render_text(&summary)));
    }

    #[test]
    fn json_report_uses_snake_case_fields() {
        let (summary, _) = fixture();
        let value: serde_json::Value = serde_json::from_str(&render_json(&summary).unwrap()).unwrap();
        assert_eq!(value["counts"]["unexpected_fail"], 1);
        assert_eq!(value["counts"]["skipped"], 1);
        assert_eq!(value["regressions"][0]["test"], "TestNew");
        assert_eq!(value["regressions"][0]["annotation"], "did_not_complete");
        assert_eq!(value["context"]["expectations_version"], "v21.1");
    }

    #[test]
    fn suggested_blocklist_drops_fixed_and_adds_regressions() {
        let (summary, lists) = fixture();
        let snippet = suggested_blocklist(&summary, &lists).unwrap();
        let table = parse_expectations(&snippet, "suggested", "unused").unwrap();
        assert_eq!(table.suite(), "gorm");

        let next = table.lists(&VersionKey::release(21, 1, 3)).unwrap();
        assert_eq!(next.blocklist_name, "gormBlocklist21_1");
        assert!(!next.is_blocklisted(&"TestFixed".into()));
        assert_eq!(next.blocklist_reason(&"TestNew".into()), Some(NEW_FAILURE_REASON));
        assert_eq!(next.blocklist_reason(&"TestStillBroken".into()), Some("#50000"));
        assert!(next.is_ignored(&"TestFlaky".into()));
    }

    #[test]
    fn suggested_blocklist_keeps_wildcard_entries_out_of_the_version() {
        let line = VersionKey::line(21, 1);
        let lists = ExpectationTable::builder("gorm")
            .version(line.clone(), "gormBlocklist21_1", "gormIgnorelist21_1")
            .block(Scope::All, "TestAlwaysBroken", "unsupported")
            .block(Scope::All, "TestGenericFixed", "#1")
            .block(Scope::Version(line), "TestLocal", "#2")
            .build()
            .lists(&VersionKey::release(21, 1, 3))
            .unwrap();
        let outcomes = [
            ("TestAlwaysBroken", ObservedOutcome::fail()),
            ("TestGenericFixed", ObservedOutcome::pass()),
            ("TestLocal", ObservedOutcome::fail()),
        ]
        .into_iter()
        .map(|(name, observed)| (TestName::from(name), observed))
        .collect();
        let discovered: Vec<TestName> = ["TestAlwaysBroken", "TestGenericFixed", "TestLocal"]
            .into_iter()
            .map(TestName::from)
            .collect();
        let summary = reconcile(&outcomes, &lists, &discovered).unwrap();

        let snippet = suggested_blocklist(&summary, &lists).unwrap();
        assert!(snippet.starts_with("# TestGenericFixed passed at v21.1.3;"));
        let file: ExpectationFile = toml::from_str(&snippet).unwrap();
        assert_eq!(
            file.wildcard.blocklist.keys().collect::<Vec<_>>(),
            vec!["TestAlwaysBroken"]
        );
        assert_eq!(
            file.versions[0].blocklist.keys().collect::<Vec<_>>(),
            vec!["TestLocal"]
        );
    }

    #[test]
    fn digest_is_sha256_hex() {
        assert_eq!(
            digest("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn write_report_creates_all_files() {
        let (summary, lists) = fixture();
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("reports").join("gorm");
        let written = write_report(&dir, &summary, &lists).unwrap();

        let text = fs::read_to_string(&written.text).unwrap();
        assert_eq!(digest(&text), written.digest);
        assert!(written.json.ends_with(JSON_REPORT_FILE));
        assert!(fs::read_to_string(&written.suggested_blocklist)
            .unwrap()
            .contains("TestNew"));
    }

    #[test]
    fn clean_run_reports_pass() {
        let lists = ExpectationTable::builder("lib/pq")
            .version(VersionKey::line(21, 2), "b", "i")
            .build()
            .lists(&VersionKey::release(21, 2, 0))
            .unwrap();
        let outcomes = [(TestName::from("TestConn"), ObservedOutcome::pass())]
            .into_iter()
            .collect();
        let summary = reconcile(&outcomes, &lists, &[TestName::from("TestConn")]).unwrap();
        assert!(render_text(&summary).ends_with("result: PASS\n"));
    }
}
