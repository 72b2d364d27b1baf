//! Virtual clock for deterministic deadline tests.

use cat_core::Clock;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Clock backed by virtual time.
///
/// Time only moves when the harness advances it, or by a fixed `tick` on
/// every reading when one is set. The tick models the cost of the work
/// done between two checkpoints, so a time budget expires after a
/// reproducible number of checkpoints.
pub struct SimClock {
    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Advance applied on every `now()` call
    tick_ns: u64,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            virtual_time_ns: Arc::new(Mutex::new(0)),
            tick_ns: 0,
        }
    }

    /// Creates a clock that advances by `tick` each time it is read.
    pub fn ticking(tick: Duration) -> Self {
        Self {
            virtual_time_ns: Arc::new(Mutex::new(0)),
            tick_ns: tick.as_nanos() as u64,
        }
    }

    /// Creates an Arc-wrapped clock for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *time = time.saturating_add(duration.as_nanos() as u64);
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time_ns: u64) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *time = time_ns;
    }

    /// Returns the current virtual time in nanoseconds without ticking.
    pub fn time_ns(&self) -> u64 {
        *self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SimClock {
    fn clone(&self) -> Self {
        Self {
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            tick_ns: self.tick_ns,
        }
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        let now = *time;
        *time = time.saturating_add(self.tick_ns);
        Duration::from_nanos(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cat_core::Deadline;

    #[test]
    fn test_sim_clock_time() {
        let clock = SimClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance_time(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(1));

        clock.advance_time(Duration::from_millis(500));
        assert_eq!(clock.now(), Duration::from_millis(1500));

        clock.set_time(7);
        assert_eq!(clock.time_ns(), 7);
    }

    #[test]
    fn test_clone_shares_time() {
        let clock1 = SimClock::new();
        let clock2 = clock1.clone();

        clock1.advance_time(Duration::from_secs(5));

        assert_eq!(clock1.now(), clock2.now());
    }

    #[test]
    fn test_ticking_clock_expires_deadline() {
        let clock = Arc::new(SimClock::ticking(Duration::from_millis(1)));
        let deadline = Deadline::start(clock.clone(), Some(Duration::from_millis(3)));

        // started at 0, end at 3ms; each check reads and ticks once
        assert!(!deadline.expired());
        assert!(!deadline.expired());
        assert!(deadline.expired());
        assert_eq!(clock.time_ns(), 4_000_000);
    }
}
