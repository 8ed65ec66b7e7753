//! Normalize raw runner output into one outcome per selected test.
//!
//! Two Go runner formats are understood: the `go test -json` event stream and
//! the `go test -v` text log. Selected tests that never reported a result
//! (crash, panic, killed binary) become failures annotated
//! [`OutcomeAnnotation::DidNotComplete`], so every selected test yields exactly
//! one outcome.
//!
//! Output of a cancelled or timed-out run is refused outright: truncated
//! output must never be scored as if it were complete.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{DchError, Result};
use crate::core::test_name::TestName;

/// Pass/fail result of one executed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
}

/// Extra context attached to an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeAnnotation {
    /// Selected but never reported a result.
    DidNotComplete,
    /// The runner reported the test as skipped; counted as a pass.
    SkippedByRunner,
}

impl fmt::Display for OutcomeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DidNotComplete => "did not complete",
            Self::SkippedByRunner => "skipped by runner",
        })
    }
}

/// Outcome plus optional annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedOutcome {
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<OutcomeAnnotation>,
}

impl ObservedOutcome {
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            outcome: Outcome::Pass,
            annotation: None,
        }
    }

    #[must_use]
    pub const fn fail() -> Self {
        Self {
            outcome: Outcome::Fail,
            annotation: None,
        }
    }

    #[must_use]
    pub const fn did_not_complete() -> Self {
        Self {
            outcome: Outcome::Fail,
            annotation: Some(OutcomeAnnotation::DidNotComplete),
        }
    }
}

/// Raw output format produced by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerFormat {
    /// `go test -json` event stream.
    GoTestJson,
    /// `go test -v` text.
    GoTestVerbose,
}

/// How the runner process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunnerCompletion {
    /// The process exited on its own. A non-zero code just means failing tests.
    Exited { code: Option<i32> },
    /// Interrupted by a signal or an operator.
    Cancelled { reason: String },
    /// Killed at the configured deadline.
    TimedOut { after_secs: u64 },
}

/// Everything the runner produced for one execution.
#[derive(Debug, Clone)]
pub struct RunnerOutput {
    pub format: RunnerFormat,
    pub bytes: Vec<u8>,
    pub completion: RunnerCompletion,
}

impl RunnerOutput {
    /// Output of a runner that exited on its own.
    #[must_use]
    pub fn completed(format: RunnerFormat, bytes: Vec<u8>, code: Option<i32>) -> Self {
        Self {
            format,
            bytes,
            completion: RunnerCompletion::Exited { code },
        }
    }
}

/// Parser result: outcomes for every selected test plus stray names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutcomes {
    pub outcomes: BTreeMap<TestName, ObservedOutcome>,
    /// Top-level names present in the output that were not selected.
    pub extraneous: Vec<TestName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawResult {
    Pass,
    Fail,
    Skip,
}

impl RawResult {
    /// Repeated results for one name (`-count=N`): any failure wins.
    const fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Fail, _) | (_, Self::Fail) => Self::Fail,
            (Self::Pass, _) | (_, Self::Pass) => Self::Pass,
            (Self::Skip, Self::Skip) => Self::Skip,
        }
    }

    const fn observed(self) -> ObservedOutcome {
        match self {
            Self::Pass => ObservedOutcome::pass(),
            Self::Fail => ObservedOutcome::fail(),
            Self::Skip => ObservedOutcome {
                outcome: Outcome::Pass,
                annotation: Some(OutcomeAnnotation::SkippedByRunner),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoTestEvent {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Test", default)]
    test: Option<String>,
}

/// Normalize `raw` against the `selected` tests.
pub fn parse(raw: &RunnerOutput, selected: &[TestName]) -> Result<ParsedOutcomes> {
    match &raw.completion {
        RunnerCompletion::Exited { .. } => {}
        RunnerCompletion::Cancelled { reason } => {
            return Err(DchError::RunAborted {
                reason: format!("runner cancelled: {reason}"),
            });
        }
        RunnerCompletion::TimedOut { after_secs } => {
            return Err(DchError::RunAborted {
                reason: format!("runner timed out after {after_secs}s"),
            });
        }
    }

    let results = match raw.format {
        RunnerFormat::GoTestJson => scan_json(&raw.bytes)?,
        RunnerFormat::GoTestVerbose => scan_verbose(&raw.bytes)?,
    };

    let wanted: HashSet<&str> = selected.iter().map(TestName::as_str).collect();
    let mut parsed = ParsedOutcomes::default();
    for name in results.keys() {
        if !wanted.contains(name.as_str()) && name.parent().is_none() {
            parsed.extraneous.push(name.clone());
        }
    }
    for name in selected {
        let observed = results
            .get(name)
            .map_or_else(ObservedOutcome::did_not_complete, |r| r.observed());
        parsed.outcomes.insert(name.clone(), observed);
    }
    Ok(parsed)
}

fn lines(bytes: &[u8]) -> impl Iterator<Item = std::borrow::Cow<'_, str>> {
    bytes
        .split(|b| *b == b'\n')
        .map(String::from_utf8_lossy)
}

fn record(results: &mut BTreeMap<TestName, RawResult>, name: &str, result: RawResult) {
    results
        .entry(TestName::from(name))
        .and_modify(|existing| *existing = existing.merge(result))
        .or_insert(result);
}

fn scan_json(bytes: &[u8]) -> Result<BTreeMap<TestName, RawResult>> {
    let mut results = BTreeMap::new();
    for (index, line) in lines(bytes).enumerate() {
        let trimmed = line.trim();
        // Build failures and toolchain chatter are plain text between events.
        if !trimmed.starts_with('{') {
            continue;
        }
        let event: GoTestEvent =
            serde_json::from_str(trimmed).map_err(|e| DchError::RunnerOutput {
                details: format!("line {}: {e}", index + 1),
            })?;
        let Some(test) = event.test.as_deref() else {
            continue;
        };
        let result = match event.action.as_str() {
            "pass" => RawResult::Pass,
            "fail" => RawResult::Fail,
            "skip" => RawResult::Skip,
            _ => continue,
        };
        record(&mut results, test, result);
    }
    Ok(results)
}

fn scan_verbose(bytes: &[u8]) -> Result<BTreeMap<TestName, RawResult>> {
    let result_line = Regex::new(r"^\s*--- (PASS|FAIL|SKIP): (\S+)")?;
    let mut results = BTreeMap::new();
    for line in lines(bytes) {
        let Some(caps) = result_line.captures(&line) else {
            continue;
        };
        let result = match &caps[1] {
            "PASS" => RawResult::Pass,
            "FAIL" => RawResult::Fail,
            _ => RawResult::Skip,
        };
        record(&mut results, &caps[2], result);
    }
    Ok(results)
}
