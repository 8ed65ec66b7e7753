//! Narrow the discovered tests down to the ones that will actually run.

use std::collections::HashSet;

use regex::Regex;

use crate::core::errors::{DchError, Result};
use crate::core::test_name::TestName;
use crate::expectations::table::ExpectationLists;

/// Reject discovery output that names the same test twice.
pub fn ensure_unique(discovered: &[TestName]) -> Result<()> {
    let mut seen = HashSet::with_capacity(discovered.len());
    for name in discovered {
        if !seen.insert(name) {
            return Err(DchError::DuplicateTestName {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Discovered tests that match `pattern`, in discovery order.
///
/// This is the universe the reconciler scores: tests filtered out by the name
/// pattern are neither run nor classified.
pub fn discovered_matching(
    discovered: &[TestName],
    pattern: Option<&Regex>,
) -> Result<Vec<TestName>> {
    ensure_unique(discovered)?;
    Ok(discovered
        .iter()
        .filter(|name| pattern.is_none_or(|re| re.is_match(name.as_str())))
        .cloned()
        .collect())
}

/// Tests to execute: matching `pattern` (when given) and not ignored.
///
/// Discovery order is kept so reports diff cleanly between runs.
pub fn select(
    discovered: &[TestName],
    lists: &ExpectationLists,
    pattern: Option<&Regex>,
) -> Result<Vec<TestName>> {
    Ok(discovered_matching(discovered, pattern)?
        .into_iter()
        .filter(|name| !lists.is_ignored(name))
        .collect())
}
