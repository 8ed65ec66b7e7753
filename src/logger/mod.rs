//! Run-event logging: JSONL file log plus human status lines.

pub mod jsonl;
pub mod status;
