//! Cooperative interrupt handling
//!
//! A harvest can take hours; the engine checks a shared flag between units
//! of work (scopes, page launches, certificate launches) and winds down
//! cleanly when it is set. In-flight requests are allowed to finish so their
//! results still land on disk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag. Cloning hands out another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. Idempotent.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once a stop has been requested
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_untriggered() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.is_triggered());
    }

    #[test]
    fn test_trigger_visible_through_clones() {
        let interrupt = Interrupt::new();
        let handle = interrupt.clone();

        handle.trigger();
        assert!(interrupt.is_triggered());
        assert!(handle.is_triggered());

        // Triggering again stays set
        interrupt.trigger();
        assert!(interrupt.is_triggered());
    }
}
