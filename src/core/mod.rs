//! Core types: errors, configuration, test names.

pub mod config;
pub mod errors;
pub mod test_name;
