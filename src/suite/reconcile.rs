//! Classification core: combine observed outcomes with the resolved
//! expectation lists and produce a [`RunSummary`].
//!
//! For every discovered test, in discovery order:
//!
//! 1. ignorelisted → [`Verdict::Skipped`], whatever the runner reported;
//! 2. no outcome → the whole reconciliation fails with
//!    [`DchError::SelectionInconsistency`];
//! 3. otherwise the outcome is crossed with blocklist membership.
//!
//! The function is pure. Identical inputs yield identical summaries, and an
//! error never comes with a partial summary.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::core::errors::{DchError, Result};
use crate::core::test_name::TestName;
use crate::expectations::table::ExpectationLists;
use crate::expectations::version::VersionKey;
use crate::suite::outcome::{ObservedOutcome, Outcome, OutcomeAnnotation};
use crate::suite::selector::ensure_unique;
use crate::suite::tags::TagAdvisory;

/// Per-test classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Blocklisted and failed.
    ExpectedFail,
    /// Not blocklisted and failed: a regression.
    UnexpectedFail,
    /// Not blocklisted and passed.
    ExpectedPass,
    /// Blocklisted and passed: the blocklist entry is stale.
    UnexpectedPass,
    /// Ignorelisted; never scored.
    Skipped,
}

impl Verdict {
    /// Every verdict, in report order.
    pub const ALL: [Self; 5] = [
        Self::ExpectedPass,
        Self::ExpectedFail,
        Self::UnexpectedFail,
        Self::UnexpectedPass,
        Self::Skipped,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ExpectedFail => "expected failures",
            Self::UnexpectedFail => "regressions",
            Self::ExpectedPass => "passes",
            Self::UnexpectedPass => "newly fixed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cross an outcome with blocklist membership.
#[must_use]
pub const fn classify(outcome: Outcome, blocklisted: bool) -> Verdict {
    match (outcome, blocklisted) {
        (Outcome::Fail, true) => Verdict::ExpectedFail,
        (Outcome::Fail, false) => Verdict::UnexpectedFail,
        (Outcome::Pass, true) => Verdict::UnexpectedPass,
        (Outcome::Pass, false) => Verdict::ExpectedPass,
    }
}

/// Number of tests per verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerdictCounts {
    pub expected_pass: usize,
    pub expected_fail: usize,
    pub unexpected_fail: usize,
    pub unexpected_pass: usize,
    pub skipped: usize,
}

impl VerdictCounts {
    #[must_use]
    pub const fn get(&self, verdict: Verdict) -> usize {
        match verdict {
            Verdict::ExpectedPass => self.expected_pass,
            Verdict::ExpectedFail => self.expected_fail,
            Verdict::UnexpectedFail => self.unexpected_fail,
            Verdict::UnexpectedPass => self.unexpected_pass,
            Verdict::Skipped => self.skipped,
        }
    }

    fn bump(&mut self, verdict: Verdict) {
        let slot = match verdict {
            Verdict::ExpectedPass => &mut self.expected_pass,
            Verdict::ExpectedFail => &mut self.expected_fail,
            Verdict::UnexpectedFail => &mut self.unexpected_fail,
            Verdict::UnexpectedPass => &mut self.unexpected_pass,
            Verdict::Skipped => &mut self.skipped,
        };
        *slot += 1;
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.expected_pass
            + self.expected_fail
            + self.unexpected_fail
            + self.unexpected_pass
            + self.skipped
    }
}

/// A test that failed without being blocklisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Regression {
    pub test: TestName,
    /// Blocklist the test is missing from.
    pub blocklist_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<OutcomeAnnotation>,
}

/// A blocklisted test that passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewlyFixed {
    pub test: TestName,
    /// Blocklist holding the stale entry.
    pub blocklist_name: String,
    /// Reason recorded with the stale entry.
    pub stale_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<OutcomeAnnotation>,
}

/// A scored test whose outcome carried an annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedTest {
    pub test: TestName,
    pub verdict: Verdict,
    pub annotation: OutcomeAnnotation,
}

/// Where the run's expectations and library pin came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    pub suite: String,
    pub target_version: VersionKey,
    pub expectations_version: VersionKey,
    pub blocklist_name: String,
    pub ignorelist_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_advisory: Option<TagAdvisory>,
}

/// The externally visible result of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub context: RunContext,
    pub counts: VerdictCounts,
    pub regressions: Vec<Regression>,
    pub newly_fixed: Vec<NewlyFixed>,
    pub annotated: Vec<AnnotatedTest>,
    /// Blocklist entries whose test was not discovered in this run.
    pub stale_blocklist: Vec<TestName>,
    /// Tests in both lists; scored as skipped.
    pub shadowed: Vec<TestName>,
}

impl RunSummary {
    /// A run is clean when nothing regressed. Skips and newly fixed tests do
    /// not affect it.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.regressions.is_empty()
    }

    /// Attach the library pin and tag advisory.
    #[must_use]
    pub fn with_library(mut self, pinned_tag: impl Into<String>, advisory: TagAdvisory) -> Self {
        self.context.pinned_tag = Some(pinned_tag.into());
        self.context.tag_advisory = Some(advisory);
        self
    }
}

/// Classify every test in `discovered`.
pub fn reconcile(
    outcomes: &BTreeMap<TestName, ObservedOutcome>,
    lists: &ExpectationLists,
    discovered: &[TestName],
) -> Result<RunSummary> {
    ensure_unique(discovered)?;

    let missing: Vec<String> = discovered
        .iter()
        .filter(|name| !lists.is_ignored(name) && !outcomes.contains_key(*name))
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(DchError::SelectionInconsistency { missing });
    }

    let mut summary = RunSummary {
        context: RunContext {
            suite: lists.suite.clone(),
            target_version: lists.requested.clone(),
            expectations_version: lists.matched.clone(),
            blocklist_name: lists.blocklist_name.clone(),
            ignorelist_name: lists.ignorelist_name.clone(),
            pinned_tag: None,
            tag_advisory: None,
        },
        counts: VerdictCounts::default(),
        regressions: Vec::new(),
        newly_fixed: Vec::new(),
        annotated: Vec::new(),
        stale_blocklist: Vec::new(),
        shadowed: lists.shadowed(),
    };

    for name in discovered {
        if lists.is_ignored(name) {
            summary.counts.bump(Verdict::Skipped);
            continue;
        }
        let Some(observed) = outcomes.get(name) else {
            continue;
        };
        let verdict = classify(observed.outcome, lists.is_blocklisted(name));
        summary.counts.bump(verdict);

        match verdict {
            Verdict::UnexpectedFail => summary.regressions.push(Regression {
                test: name.clone(),
                blocklist_name: lists.blocklist_name.clone(),
                annotation: observed.annotation,
            }),
            Verdict::UnexpectedPass => summary.newly_fixed.push(NewlyFixed {
                test: name.clone(),
                blocklist_name: lists.blocklist_name.clone(),
                stale_reason: lists.blocklist_reason(name).unwrap_or_default().to_string(),
                annotation: observed.annotation,
            }),
            Verdict::ExpectedFail | Verdict::ExpectedPass | Verdict::Skipped => {}
        }
        if let Some(annotation) = observed.annotation {
            summary.annotated.push(AnnotatedTest {
                test: name.clone(),
                verdict,
                annotation,
            });
        }
    }

    let discovered_set: HashSet<&TestName> = discovered.iter().collect();
    summary.stale_blocklist = lists
        .blocklist()
        .keys()
        .filter(|name| !discovered_set.contains(name))
        .cloned()
        .collect();

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectations::table::ExpectationTable;
    use crate::expectations::version::Scope;
    use proptest::prelude::*;

    fn names(raw: &[&str]) -> Vec<TestName> {
        raw.iter().copied().map(TestName::from).collect()
    }

    fn lists(blocked: &[&str], ignored: &[&str]) -> ExpectationLists {
        let line = VersionKey::line(21, 1);
        let scope = Scope::Version(line.clone());
        let mut builder =
            ExpectationTable::builder("gorm").version(line, "gormBlocklist21_1", "gormIgnorelist21_1");
        for name in blocked {
            builder = builder.block(scope.clone(), *name, format!("issue for {name}"));
        }
        for name in ignored {
            builder = builder.ignore(scope.clone(), *name, "flaky");
        }
        builder
            .build()
            .lists(&VersionKey::release(21, 1, 3))
            .unwrap()
    }

    fn outcomes(pairs: &[(&str, ObservedOutcome)]) -> BTreeMap<TestName, ObservedOutcome> {
        pairs
            .iter()
            .map(|(name, observed)| (TestName::from(*name), *observed))
            .collect()
    }

    #[test]
    fn scenario_expected_results() {
        let summary = reconcile(
            &outcomes(&[("T1", ObservedOutcome::pass()), ("T2", ObservedOutcome::fail())]),
            &lists(&["T2"], &["T3"]),
            &names(&["T1", "T2", "T3"]),
        )
        .unwrap();

        assert_eq!(summary.counts.expected_pass, 1);
        assert_eq!(summary.counts.expected_fail, 1);
        assert_eq!(summary.counts.skipped, 1);
        assert_eq!(summary.counts.total(), 3);
        assert!(summary.regressions.is_empty());
        assert!(summary.newly_fixed.is_empty());
        assert!(summary.is_clean());
    }

    #[test]
    fn scenario_regression_and_fix() {
        let summary = reconcile(
            &outcomes(&[("T1", ObservedOutcome::fail()), ("T2", ObservedOutcome::pass())]),
            &lists(&["T2"], &["T3"]),
            &names(&["T1", "T2", "T3"]),
        )
        .unwrap();

        assert_eq!(summary.counts.unexpected_fail, 1);
        assert_eq!(summary.counts.unexpected_pass, 1);
        assert_eq!(summary.counts.skipped, 1);
        assert_eq!(
            summary.regressions,
            vec![Regression {
                test: "T1".into(),
                blocklist_name: "gormBlocklist21_1".to_string(),
                annotation: None,
            }]
        );
        assert_eq!(summary.newly_fixed.len(), 1);
        assert_eq!(summary.newly_fixed[0].test, TestName::from("T2"));
        assert_eq!(summary.newly_fixed[0].stale_reason, "issue for T2");
        assert!(!summary.is_clean());
    }

    #[test]
    fn scenario_missing_outcome_is_inconsistent() {
        let err = reconcile(&outcomes(&[]), &lists(&[], &[]), &names(&["T1"])).unwrap_err();
        assert_eq!(err.code(), "DCH-2102");
        assert!(err.is_fatal());
    }

    #[test]
    fn all_missing_names_are_reported() {
        let err = reconcile(
            &outcomes(&[("T2", ObservedOutcome::pass())]),
            &lists(&[], &[]),
            &names(&["T1", "T2", "T3"]),
        )
        .unwrap_err();
        let DchError::SelectionInconsistency { missing } = err else {
            panic!("wrong error");
        };
        assert_eq!(missing, vec!["T1".to_string(), "T3".to_string()]);
    }

    #[test]
    fn ignorelist_wins_over_blocklist() {
        let summary = reconcile(
            &outcomes(&[("T1", ObservedOutcome::fail())]),
            &lists(&["T1"], &["T1"]),
            &names(&["T1"]),
        )
        .unwrap();
        assert_eq!(summary.counts.skipped, 1);
        assert_eq!(summary.counts.expected_fail, 0);
        assert_eq!(summary.shadowed, names(&["T1"]));
    }

    #[test]
    fn ignored_tests_that_ran_are_still_skipped() {
        let summary = reconcile(
            &outcomes(&[("T1", ObservedOutcome::fail())]),
            &lists(&[], &["T1"]),
            &names(&["T1"]),
        )
        .unwrap();
        assert_eq!(summary.counts.skipped, 1);
        assert!(summary.is_clean());
    }

    #[test]
    fn incomplete_execution_is_classified_and_annotated() {
        let summary = reconcile(
            &outcomes(&[
                ("T1", ObservedOutcome::did_not_complete()),
                ("T2", ObservedOutcome::did_not_complete()),
            ]),
            &lists(&["T2"], &[]),
            &names(&["T1", "T2"]),
        )
        .unwrap();
        assert_eq!(summary.counts.unexpected_fail, 1);
        assert_eq!(summary.counts.expected_fail, 1);
        assert_eq!(
            summary.regressions[0].annotation,
            Some(OutcomeAnnotation::DidNotComplete)
        );
        assert_eq!(summary.annotated.len(), 2);
        assert_eq!(summary.annotated[1].verdict, Verdict::ExpectedFail);
    }

    #[test]
    fn stale_blocklist_entries_are_listed() {
        let summary = reconcile(
            &outcomes(&[("T1", ObservedOutcome::pass())]),
            &lists(&["TGone", "AlsoGone"], &[]),
            &names(&["T1"]),
        )
        .unwrap();
        assert_eq!(summary.stale_blocklist, names(&["AlsoGone", "TGone"]));
    }

    #[test]
    fn regressions_follow_discovery_order() {
        let summary = reconcile(
            &outcomes(&[
                ("Zeta", ObservedOutcome::fail()),
                ("Alpha", ObservedOutcome::fail()),
                ("Mid", ObservedOutcome::fail()),
            ]),
            &lists(&[], &[]),
            &names(&["Zeta", "Alpha", "Mid"]),
        )
        .unwrap();
        let order: Vec<&str> = summary.regressions.iter().map(|r| r.test.as_str()).collect();
        assert_eq!(order, vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn duplicate_discovery_is_rejected() {
        let err = reconcile(
            &outcomes(&[("T1", ObservedOutcome::pass())]),
            &lists(&[], &[]),
            &names(&["T1", "T1"]),
        )
        .unwrap_err();
        assert_eq!(err.code(), "DCH-2101");
    }

    #[test]
    fn context_comes_from_lists() {
        let summary = reconcile(&outcomes(&[]), &lists(&[], &[]), &[]).unwrap();
        assert_eq!(summary.context.suite, "gorm");
        assert_eq!(summary.context.target_version, VersionKey::release(21, 1, 3));
        assert_eq!(summary.context.expectations_version, VersionKey::line(21, 1));
        assert_eq!(summary.counts.total(), 0);
    }

    #[derive(Debug, Clone)]
    struct Case {
        name: String,
        blocked: bool,
        ignored: bool,
        outcome: Option<Outcome>,
    }

    fn case() -> impl Strategy<Value = Case> {
        (
            "T[a-z]{1,6}",
            any::<bool>(),
            any::<bool>(),
            prop_oneof![Just(Outcome::Pass), Just(Outcome::Fail)],
        )
            .prop_map(|(name, blocked, ignored, outcome)| Case {
                name,
                blocked,
                ignored,
                outcome: if ignored { None } else { Some(outcome) },
            })
    }

    fn cases() -> impl Strategy<Value = Vec<Case>> {
        prop::collection::vec(case(), 0..40).prop_map(|mut cases| {
            let mut seen = HashSet::new();
            cases.retain(|c| seen.insert(c.name.clone()));
            cases
        })
    }

    fn build(cases: &[Case]) -> (BTreeMap<TestName, ObservedOutcome>, ExpectationLists, Vec<TestName>) {
        let blocked: Vec<&str> = cases.iter().filter(|c| c.blocked).map(|c| c.name.as_str()).collect();
        let ignored: Vec<&str> = cases.iter().filter(|c| c.ignored).map(|c| c.name.as_str()).collect();
        let observed = cases
            .iter()
            .filter_map(|c| {
                c.outcome.map(|outcome| {
                    (
                        TestName::from(c.name.as_str()),
                        ObservedOutcome {
                            outcome,
                            annotation: None,
                        },
                    )
                })
            })
            .collect();
        let discovered = cases.iter().map(|c| TestName::from(c.name.as_str())).collect();
        (observed, lists(&blocked, &ignored), discovered)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn verdicts_follow_membership(cases in cases()) {
            let (observed, lists, discovered) = build(&cases);
            let summary = reconcile(&observed, &lists, &discovered).unwrap();

            let mut expected = VerdictCounts::default();
            for c in &cases {
                let verdict = match (c.ignored, c.outcome) {
                    (true, _) => Verdict::Skipped,
                    (false, Some(outcome)) => classify(outcome, c.blocked),
                    (false, None) => unreachable!(),
                };
                expected.bump(verdict);
            }
            prop_assert_eq!(summary.counts, expected);
            prop_assert_eq!(summary.counts.total(), cases.len());
            prop_assert_eq!(summary.regressions.len(), summary.counts.unexpected_fail);
            prop_assert_eq!(summary.newly_fixed.len(), summary.counts.unexpected_pass);
        }

        #[test]
        fn reconcile_is_idempotent(cases in cases()) {
            let (observed, lists, discovered) = build(&cases);
            let first = reconcile(&observed, &lists, &discovered).unwrap();
            let second = reconcile(&observed, &lists, &discovered).unwrap();
            prop_assert_eq!(
                serde_json::to_string(&first).unwrap(),
                serde_json::to_string(&second).unwrap()
            );
        }

        #[test]
        fn never_blocklisted_pass_is_expected_pass(blocked in any::<bool>(), pass in any::<bool>()) {
            let outcome = if pass { Outcome::Pass } else { Outcome::Fail };
            let verdict = classify(outcome, blocked);
            let expected = match (blocked, pass) {
                (false, true) => Verdict::ExpectedPass,
                (false, false) => Verdict::UnexpectedFail,
                (true, false) => Verdict::ExpectedFail,
                (true, true) => Verdict::UnexpectedPass,
            };
            prop_assert_eq!(verdict, expected);
        }
    }
}
