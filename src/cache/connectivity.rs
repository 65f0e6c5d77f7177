//! Backend Link State
//!
//! Soft up/down tracking for network-backed caches. A network-class failure
//! flips the link Down and the affected call degrades to a no-op or a miss;
//! the next success flips it back Up. Each transition is logged exactly
//! once; repeated failures and successes stay quiet.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

// == Link State ==
/// The two states of a backend link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

// == Connectivity ==
/// Two-state connectivity machine shared by all calls into one backend.
#[derive(Debug)]
pub struct Connectivity {
    backend: String,
    up: AtomicBool,
}

impl Connectivity {
    /// Creates a link in the Up state.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            up: AtomicBool::new(true),
        }
    }

    pub fn state(&self) -> LinkState {
        if self.up.load(Ordering::SeqCst) {
            LinkState::Up
        } else {
            LinkState::Down
        }
    }

    pub fn is_up(&self) -> bool {
        self.state() == LinkState::Up
    }

    // == Lost ==
    /// Records a failed round-trip. Logs only on the Up -> Down edge.
    pub fn lost(&self, detail: &str) {
        if self
            .up
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            warn!(backend = %self.backend, %detail, "cache backend is down");
        }
    }

    // == Restored ==
    /// Records a successful round-trip. Logs only on the Down -> Up edge.
    pub fn restored(&self) {
        if self
            .up
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!(backend = %self.backend, "cache backend is back up");
        }
    }
}
