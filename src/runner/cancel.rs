//! Run cancellation: SIGINT/SIGTERM set a flag that the runner poll loop
//! checks between reads.
//!
//! Uses `signal-hook` so no code runs inside the signal handler itself.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    /// A flag only set programmatically.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag also set by SIGINT and SIGTERM.
    ///
    /// Registration is best-effort; failures are reported on stderr.
    #[must_use]
    pub fn with_signals() -> Self {
        let cancel = Self::new();
        for (name, signal) in [("SIGINT", SIGINT), ("SIGTERM", SIGTERM)] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&cancel.flag)) {
                eprintln!("[DCH-SIGNAL] failed to register {name}: {e}");
            }
        }
        cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}
