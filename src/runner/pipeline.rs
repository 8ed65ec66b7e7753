//! `run_compatibility_suite`: one suite against one target version.
//!
//! Order matters. Everything that can fail as a configuration problem
//! (applicability, expectations) is checked before any external step runs,
//! and tag discovery is consulted before provisioning but never aborts the run.
//! A run yields a complete [`RunSummary`] or exactly one error; every step
//! leaves a JSONL event.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::config::{Config, SuiteConfig};
use crate::core::errors::{DchError, Result};
use crate::expectations::loader::load_expectations;
use crate::expectations::table::{ExpectationLists, ExpectationTable};
use crate::expectations::version::VersionKey;
use crate::logger::jsonl::{EventSink, EventType, LogEntry, Severity};
use crate::runner::collaborators::{Collaborators, TestPackage};
use crate::suite::outcome::{self, ObservedOutcome};
use crate::suite::reconcile::{RunSummary, reconcile};
use crate::suite::selector::{discovered_matching, select};
use crate::suite::tags::{TagAdvisory, advise};

/// Everything a run needs besides the target version and pinned tag.
pub struct HarnessContext<'a> {
    pub suite: &'a SuiteConfig,
    pub expectations: &'a ExpectationTable,
    pub collaborators: &'a dyn Collaborators,
    /// Checkouts go to `<work_dir>/<suite slug>`.
    pub work_dir: &'a Path,
    /// Logged with `run_start` so runs can be matched to their config.
    pub config_hash: Option<String>,
    pub events: &'a mut dyn EventSink,
}

/// Load the expectation table registered for `suite`.
pub fn load_suite_expectations(config: &Config, suite: &SuiteConfig) -> Result<ExpectationTable> {
    load_expectations(&config.expectations_path(suite), &suite.name)
}

/// Fail with `SuiteNotApplicable` when `target` predates the suite.
pub fn check_applicable(suite: &SuiteConfig, target: &VersionKey) -> Result<()> {
    if suite.applies_to(target)? {
        Ok(())
    } else {
        Err(DchError::SuiteNotApplicable {
            suite: suite.name.clone(),
            min_version: suite.min_version.clone(),
            version: target.to_string(),
        })
    }
}

/// Run `ctx.suite` at `pinned_tag` against `target_version` and classify it.
pub fn run_compatibility_suite(
    ctx: &mut HarnessContext<'_>,
    target_version: &VersionKey,
    pinned_tag: &str,
) -> Result<RunSummary> {
    let mut start = LogEntry::info(EventType::RunStart).suite(&ctx.suite.name);
    start.target_version = Some(target_version.to_string());
    start.pinned_tag = Some(pinned_tag.to_string());
    start.config_hash.clone_from(&ctx.config_hash);
    ctx.events.record(start);

    let started = Instant::now();
    match run_steps(ctx, target_version, pinned_tag) {
        Ok(summary) => {
            let mut done = LogEntry::info(EventType::RunComplete)
                .suite(&ctx.suite.name)
                .count(summary.counts.total());
            done.regressions = Some(summary.regressions.len());
            done.duration_ms = Some(elapsed_ms(started));
            ctx.events.record(done);
            Ok(summary)
        }
        Err(err) => {
            let mut aborted = LogEntry::new(EventType::RunAborted, Severity::Error)
                .suite(&ctx.suite.name)
                .error(&err);
            aborted.duration_ms = Some(elapsed_ms(started));
            ctx.events.record(aborted);
            Err(err)
        }
    }
}

fn run_steps(
    ctx: &mut HarnessContext<'_>,
    target: &VersionKey,
    pinned_tag: &str,
) -> Result<RunSummary> {
    let suite = ctx.suite;
    check_applicable(suite, target)?;

    let lists = ctx.expectations.require_lists(target)?;
    ctx.events.record(expectations_entry(suite, target, &lists));

    let tag_pattern = suite.tag_pattern()?;
    let list_regex = suite.list_regex()?;
    let advisory = advise(
        ctx.collaborators.tag_source(),
        &suite.repo_url,
        &tag_pattern,
        pinned_tag,
    );
    ctx.events.record(advisory_entry(suite, pinned_tag, &advisory));

    let collaborators = ctx.collaborators;
    let cluster = collaborators.provision_cluster()?;
    collaborators.start_database(&cluster, target)?;

    let checkout = ctx.work_dir.join(suite.slug());
    collaborators.clone_at_tag(&suite.repo_url, pinned_tag, &checkout)?;
    let package = TestPackage::new(package_dir(&checkout, suite), &cluster, &suite.env);
    collaborators.prepare_package(&package, &suite.setup_commands)?;

    let discovered = collaborators.discover_tests(&package, suite.list_pattern.as_deref())?;
    ctx.events.record(
        LogEntry::info(EventType::TestsDiscovered)
            .suite(&suite.name)
            .count(discovered.len()),
    );

    let universe = discovered_matching(&discovered, list_regex.as_ref())?;
    let selected = select(&discovered, &lists, list_regex.as_ref())?;
    ctx.events.record(
        LogEntry::info(EventType::TestsSelected)
            .suite(&suite.name)
            .count(selected.len()),
    );

    let outcomes = if selected.is_empty() {
        BTreeMap::<_, ObservedOutcome>::new()
    } else {
        let exec_started = Instant::now();
        let raw = collaborators.execute_tests(&package, &selected)?;
        let parsed = outcome::parse(&raw, &selected)?;

        let mut entry = LogEntry::info(EventType::ExecutionComplete)
            .suite(&suite.name)
            .count(parsed.outcomes.len());
        entry.duration_ms = Some(elapsed_ms(exec_started));
        if !parsed.extraneous.is_empty() {
            let names: Vec<&str> = parsed.extraneous.iter().map(|n| n.as_str()).collect();
            entry = entry.details(format!("unselected results ignored: {}", names.join(", ")));
        }
        ctx.events.record(entry);
        parsed.outcomes
    };

    Ok(reconcile(&outcomes, &lists, &universe)?.with_library(pinned_tag, advisory))
}

fn package_dir(checkout: &Path, suite: &SuiteConfig) -> PathBuf {
    suite
        .test_subdir
        .as_ref()
        .map_or_else(|| checkout.to_path_buf(), |sub| checkout.join(sub))
}

fn expectations_entry(suite: &SuiteConfig, target: &VersionKey, lists: &ExpectationLists) -> LogEntry {
    let mut entry = LogEntry::info(EventType::ExpectationsResolved)
        .suite(&suite.name)
        .count(lists.blocklist().len() + lists.ignorelist().len());
    entry.target_version = Some(target.to_string());
    entry.expectations_version = Some(lists.matched.to_string());
    entry.blocklist = Some(lists.blocklist_name.clone());
    entry.ignorelist = Some(lists.ignorelist_name.clone());
    entry
}

fn advisory_entry(suite: &SuiteConfig, pinned_tag: &str, advisory: &TagAdvisory) -> LogEntry {
    let mut entry = match advisory {
        TagAdvisory::Current { latest } | TagAdvisory::NewerAvailable { latest } => {
            let mut entry = LogEntry::info(EventType::TagResolved);
            entry.latest_tag = Some(latest.clone());
            if advisory.newer_available() {
                entry = entry.details("newer release than the supported tag");
            }
            entry
        }
        TagAdvisory::Unknown { reason } => {
            let mut entry = LogEntry::new(EventType::TagUnknown, Severity::Warning);
            entry.error_message = Some(reason.clone());
            entry
        }
    };
    entry.suite = Some(suite.name.clone());
    entry.pinned_tag = Some(pinned_tag.to_string());
    entry
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::builtin_suites;

    fn gorm() -> SuiteConfig {
        builtin_suites().remove(0)
    }

    #[test]
    fn old_targets_are_not_applicable() {
        let err = check_applicable(&gorm(), &VersionKey::release(19, 2, 0)).unwrap_err();
        assert_eq!(err.code(), "DCH-1104");
        assert!(err.is_configuration());
        assert!(check_applicable(&gorm(), &VersionKey::release(20, 1, 0)).is_ok());
    }

    #[test]
    fn package_dir_honours_subdir() {
        let checkout = Path::new("/work/gorm");
        assert_eq!(package_dir(checkout, &gorm()), PathBuf::from("/work/gorm/tests"));

        let mut root = gorm();
        root.test_subdir = None;
        assert_eq!(package_dir(checkout, &root), PathBuf::from("/work/gorm"));
    }

    #[test]
    fn unknown_advisory_is_a_warning() {
        let entry = advisory_entry(
            &gorm(),
            "v1.21.8",
            &TagAdvisory::Unknown {
                reason: "offline".to_string(),
            },
        );
        assert_eq!(entry.event, EventType::TagUnknown);
        assert_eq!(entry.severity, Severity::Warning);
        assert_eq!(entry.pinned_tag.as_deref(), Some("v1.21.8"));
    }

    #[test]
    fn newer_release_is_noted() {
        let entry = advisory_entry(
            &gorm(),
            "v1.21.8",
            &TagAdvisory::NewerAvailable {
                latest: "v1.22.0".to_string(),
            },
        );
        assert_eq!(entry.latest_tag.as_deref(), Some("v1.22.0"));
        assert!(entry.details.is_some());
    }
}
