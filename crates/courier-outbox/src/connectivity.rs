//! Connectivity gate for the drain loop.

use std::sync::atomic::{AtomicBool, Ordering};

/// Reports whether the network is usable. The drain loop idles while it
/// reports false.
pub trait ConnectivityProbe: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Probe that never reports offline.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysConnected;

impl ConnectivityProbe for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }
}

/// Probe driven by the embedding application.
#[derive(Debug)]
pub struct ConnectivityFlag {
    connected: AtomicBool,
}

impl ConnectivityFlag {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    pub fn set(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl ConnectivityProbe for ConnectivityFlag {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
