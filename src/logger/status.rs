//! Human progress lines on stderr, derived from run events.

#![allow(missing_docs)]

use std::io::{self, Write};

use crate::logger::jsonl::{EventSink, EventType, LogEntry, Severity};

/// How chatty the status output is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    #[must_use]
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }
}

/// Least verbosity at which `entry` is shown.
fn threshold(entry: &LogEntry) -> Verbosity {
    match (entry.severity, entry.event) {
        (Severity::Error, _) => Verbosity::Quiet,
        (_, EventType::TestsDiscovered | EventType::ExecutionComplete) => Verbosity::Verbose,
        _ => Verbosity::Normal,
    }
}

fn field(value: Option<&String>) -> &str {
    value.map_or("?", String::as_str)
}

/// One-line human rendering of a run event.
#[must_use]
pub fn describe(entry: &LogEntry) -> String {
    let suite = field(entry.suite.as_ref());
    match entry.event {
        EventType::RunStart => format!(
            "running {suite} against {}",
            field(entry.target_version.as_ref())
        ),
        EventType::TagResolved => format!(
            "Latest {suite} release is {}. Supported {suite} release is {}.",
            field(entry.latest_tag.as_ref()),
            field(entry.pinned_tag.as_ref())
        ),
        EventType::TagUnknown => format!(
            "Latest {suite} release is unknown ({}). Supported {suite} release is {}.",
            field(entry.error_message.as_ref()),
            field(entry.pinned_tag.as_ref())
        ),
        EventType::ExpectationsResolved => format!(
            "Running version {}, using blocklist {}, using ignorelist {}",
            field(entry.target_version.as_ref()),
            field(entry.blocklist.as_ref()),
            field(entry.ignorelist.as_ref())
        ),
        EventType::TestsDiscovered => {
            format!("discovered {} test(s)", entry.count.unwrap_or_default())
        }
        EventType::TestsSelected => format!(
            "running {} selected test(s)",
            entry.count.unwrap_or_default()
        ),
        EventType::ExecutionComplete => format!(
            "runner finished after {} ms",
            entry.duration_ms.unwrap_or_default()
        ),
        EventType::RunComplete => format!(
            "{suite}: {} test(s) classified, {} regression(s)",
            entry.count.unwrap_or_default(),
            entry.regressions.unwrap_or_default()
        ),
        EventType::RunAborted => format!(
            "{suite}: run aborted: {}",
            field(entry.error_message.as_ref())
        ),
    }
}

/// Prints `[DCH]` status lines and forwards every event to `inner`.
pub struct StatusSink<S, W = io::Stderr> {
    inner: S,
    out: W,
    verbosity: Verbosity,
}

impl<S: EventSink> StatusSink<S> {
    pub fn stderr(inner: S, verbosity: Verbosity) -> Self {
        Self::with_writer(inner, io::stderr(), verbosity)
    }
}

impl<S: EventSink, W: Write> StatusSink<S, W> {
    pub fn with_writer(inner: S, out: W, verbosity: Verbosity) -> Self {
        Self {
            inner,
            out,
            verbosity,
        }
    }

    pub fn into_parts(self) -> (S, W) {
        (self.inner, self.out)
    }
}

impl<S: EventSink, W: Write> EventSink for StatusSink<S, W> {
    fn record(&mut self, entry: LogEntry) {
        if self.verbosity >= threshold(&entry) {
            let _ = writeln!(self.out, "[DCH] {}", describe(&entry));
        }
        self.inner.record(entry);
    }
}
