//! Network availability seam.
//!
//! Connectivity detection lives in the host application; the manager only
//! asks a yes/no question before starting a transfer.

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers whether a network connection is currently usable.
pub trait Connectivity: Send + Sync {
    /// Whether a transfer may be attempted now.
    fn is_online(&self) -> bool;
}

/// Connectivity that always reports online.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Connectivity flag the host flips from its own network callbacks.
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl ConnectivityFlag {
    /// Create a flag with the given initial state.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Update the flag.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
