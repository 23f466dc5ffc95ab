// Log a recurring failure once when it starts and once when it clears
//
// Both the control loop and the health publisher run every tick, so logging
// each failed attempt would flood the log at loop rate.

use std::fmt::Display;

use tracing::{info, warn};

#[derive(Debug)]
pub struct FaultLatch {
    what: &'static str,
    faulted: bool,
}

impl FaultLatch {
    pub fn new(what: &'static str) -> Self {
        Self { what, faulted: false }
    }

    /// Record the outcome of one attempt. Returns true when the fault state
    /// changed, which is also the only time anything is logged.
    pub fn record<E: Display>(&mut self, outcome: Result<(), E>) -> bool {
        match outcome {
            Err(e) if !self.faulted => {
                warn!("{} failed: {}", self.what, e);
                self.faulted = true;
                true
            }
            Ok(()) if self.faulted => {
                info!("{} recovered", self.what);
                self.faulted = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_healthy() {
        let latch = FaultLatch::new("output");
        assert!(!latch.is_faulted());
    }

    #[test]
    fn test_reports_each_transition_once() {
        let mut latch = FaultLatch::new("output");

        assert!(!latch.record(Ok::<(), &str>(())));
        assert!(latch.record(Err("timeout")));
        assert!(latch.is_faulted());
        assert!(!latch.record(Err("timeout")));
        assert!(!latch.record(Err("checksum")));

        assert!(latch.record(Ok::<(), &str>(())));
        assert!(!latch.is_faulted());
        assert!(!latch.record(Ok::<(), &str>(())));

        assert!(latch.record(Err("timeout")));
    }
}
