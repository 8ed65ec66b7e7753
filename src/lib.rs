#![forbid(unsafe_code)]

//! Driver compatibility harness (dch): runs a client library's own Go test
//! suite against a database build and reconciles the outcome with
//! version-keyed expected-failure tables.
//!
//! A run is scored, never merely passed or failed:
//! 1. **Expectations**: blocklist (known failures) and ignorelist (never run),
//!    resolved for the target version with same-line fallback.
//! 2. **Selection and parsing**: discovered tests minus the ignorelist, then
//!    `go test` output normalized to one outcome per selected test.
//! 3. **Reconciliation**: outcome × expectation → verdict; regressions and
//!    newly fixed tests are what a reader acts on.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use driver_compat_harness::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use driver_compat_harness::expectations::table::ExpectationTable;
//! use driver_compat_harness::suite::reconcile::reconcile;
//! ```

pub mod prelude;

pub mod core;
pub mod expectations;
pub mod logger;
pub mod runner;
pub mod suite;
