//! Run orchestration and the external steps it drives.

#[cfg(feature = "process")]
pub mod cancel;
pub mod collaborators;
pub mod pipeline;
#[cfg(feature = "process")]
pub mod process;
