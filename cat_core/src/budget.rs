//! Time budget for one event.
//!
//! The tracker never reads the time directly. It asks a [`Clock`] at a few
//! cooperative checkpoints (after each growth step and after each resolved
//! window), so the harness can drive it with a virtual clock.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source.
///
/// # Implementations
///
/// - **Production**: [`SystemClock`] - wraps `std::time::Instant`
/// - **Simulation**: a virtual clock advanced by the test harness
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;
}

/// Wall clock backed by `Instant`.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped clock for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Point in time after which further search is abandoned.
#[derive(Clone)]
pub struct Deadline {
    clock: Arc<dyn Clock>,
    end: Option<Duration>,
}

impl Deadline {
    /// Starts counting `budget` from now; `None` never expires.
    pub fn start(clock: Arc<dyn Clock>, budget: Option<Duration>) -> Self {
        let end = budget.map(|b| clock.now().saturating_add(b));
        Self { clock, end }
    }

    pub fn unlimited() -> Self {
        Self {
            clock: SystemClock::shared(),
            end: None,
        }
    }

    pub fn expired(&self) -> bool {
        self.end.is_some_and(|end| self.clock.now() >= end)
    }

    /// Time left, `None` when unlimited.
    pub fn remaining(&self) -> Option<Duration> {
        self.end.map(|end| end.saturating_sub(self.clock.now()))
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deadline")
            .field("now", &self.clock.now())
            .field("end", &self.end)
            .finish()
    }
}
