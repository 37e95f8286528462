//! [`LinkGuard`] – consecutive link-loss detector.
//!
//! The session loop reports the transport's connection status once per tick.
//! The guard counts how many ticks in a row the link was down and trips once
//! that count exceeds the configured allowance.
//!
//! # Example
//!
//! ```rust
//! use junior_runtime::link_guard::LinkGuard;
//!
//! let mut guard = LinkGuard::new(2);
//!
//! assert!(!guard.record(false));
//! assert!(!guard.record(false));
//! assert!(guard.record(false)); // third miss exceeds the allowance of 2
//!
//! // A connected tick clears the streak.
//! assert!(!guard.record(true));
//! assert!(!guard.record(false));
//! ```

/// Trips after more than `allowance` consecutive disconnected ticks.
///
/// An allowance of 0 trips on the first disconnected tick, which is what
/// notify-mode sessions use.
#[derive(Debug, Clone)]
pub struct LinkGuard {
    allowance: u32,
    misses: u32,
}

impl LinkGuard {
    pub fn new(allowance: u32) -> Self {
        Self {
            allowance,
            misses: 0,
        }
    }

    /// Record this tick's link status.  Returns `true` when the link has been
    /// down for too long.
    pub fn record(&mut self, connected: bool) -> bool {
        if connected {
            self.misses = 0;
        } else {
            self.misses = self.misses.saturating_add(1);
        }
        self.is_lost()
    }

    pub fn is_lost(&self) -> bool {
        self.misses > self.allowance
    }

    /// Consecutive disconnected ticks so far.
    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn reset(&mut self) {
        self.misses = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_ticks_never_trip() {
        let mut guard = LinkGuard::new(0);
        for _ in 0..100 {
            assert!(!guard.record(true));
        }
    }

    #[test]
    fn zero_allowance_trips_immediately() {
        let mut guard = LinkGuard::new(0);
        assert!(guard.record(false));
    }

    #[test]
    fn trips_only_after_exceeding_allowance() {
        let mut guard = LinkGuard::new(3);
        for _ in 0..3 {
            assert!(!guard.record(false));
        }
        assert!(guard.record(false));
        assert!(guard.record(false)); // stays tripped
        assert_eq!(guard.misses(), 5);
    }

    #[test]
    fn reconnect_breaks_streak() {
        let mut guard = LinkGuard::new(2);
        guard.record(false);
        guard.record(false);
        guard.record(true);
        assert!(!guard.record(false));
        assert_eq!(guard.misses(), 1);
    }

    #[test]
    fn reset_clears_misses() {
        let mut guard = LinkGuard::new(1);
        guard.record(false);
        assert!(guard.record(false));
        guard.reset();
        assert!(!guard.is_lost());
    }
}
