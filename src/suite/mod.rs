//! Per-run pipeline stages: tag discovery, selection, outcome parsing,
//! reconciliation and reporting.

pub mod outcome;
pub mod reconcile;
pub mod report;
pub mod selector;
pub mod tags;
