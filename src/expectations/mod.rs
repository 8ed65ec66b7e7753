//! Version-keyed blocklists and ignorelists.

pub mod loader;
pub mod table;
pub mod version;
