//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use driver_compat_harness::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, SuiteConfig};
pub use crate::core::errors::{DchError, Result};
pub use crate::core::test_name::TestName;

// Expectations
pub use crate::expectations::loader::{load_expectations, parse_expectations};
pub use crate::expectations::table::{ExpectationLists, ExpectationTable};
pub use crate::expectations::version::{Scope, VersionKey};

// Suite stages
pub use crate::suite::outcome::{Outcome, OutcomeAnnotation, RunnerFormat, RunnerOutput};
pub use crate::suite::reconcile::{RunSummary, Verdict, reconcile};
pub use crate::suite::report::{render_json, render_text, write_report};
pub use crate::suite::tags::{ReleaseTagPattern, TagAdvisory, TagSource, resolve_latest_tag};

// Runner
pub use crate::runner::collaborators::{ClusterHandle, Collaborators, TestPackage};
pub use crate::runner::pipeline::{HarnessContext, run_compatibility_suite};

// Logging
pub use crate::logger::jsonl::{EventSink, JsonlWriter, LogEntry};
