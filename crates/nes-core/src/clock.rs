//! Monotonic clock sources and cycle pacing
//!
//! The processor loop throttles itself to the console's clock by spinning
//! after every instruction until the instruction's cycle budget has
//! elapsed. Sleeping is too coarse for per-instruction budgets of a few
//! hundred nanoseconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// NTSC 2A03 clock (21.477272 MHz / 12)
pub const NTSC_CPU_FREQUENCY: u32 = 1_789_773;

/// PAL 2A07 clock (26.601712 MHz / 16)
pub const PAL_CPU_FREQUENCY: u32 = 1_662_607;

/// Monotonic time source
pub trait Clock: Send {
    /// Time elapsed since an arbitrary fixed origin
    fn now(&self) -> Duration;
}

/// Wall clock backed by `Instant`
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Deterministic clock: every reading advances time by a fixed quantum.
///
/// Clones share the same timeline, so a test can keep one copy to observe
/// how far the engine has advanced it.
#[derive(Debug, Clone)]
pub struct SteppingClock {
    nanos: Arc<AtomicU64>,
    quantum: u64,
}

impl SteppingClock {
    pub fn new(quantum: Duration) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(0)),
            quantum: quantum.as_nanos() as u64,
        }
    }

    /// Current position without advancing
    pub fn peek(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.fetch_add(self.quantum, Ordering::Relaxed))
    }
}

/// Spins until a cycle budget has elapsed on the injected clock
pub struct Pacer {
    clock: Box<dyn Clock>,
    /// Nanoseconds per cycle; `None` disables throttling
    cycle_time: Option<f64>,
}

impl Pacer {
    pub fn new(clock: impl Clock + 'static, frequency_hz: u32) -> Self {
        Self {
            clock: Box::new(clock),
            cycle_time: Some(1_000_000_000.0 / frequency_hz.max(1) as f64),
        }
    }

    /// Pacer that never waits
    pub fn unthrottled(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            cycle_time: None,
        }
    }

    /// Start of an iteration
    pub fn mark(&self) -> Duration {
        self.clock.now()
    }

    /// Budget for `cycles`
    pub fn budget(&self, cycles: u64) -> Duration {
        match self.cycle_time {
            Some(cycle_time) => Duration::from_nanos((cycles as f64 * cycle_time) as u64),
            None => Duration::ZERO,
        }
    }

    /// Busy-wait until `cycles` worth of time has passed since `start`,
    /// or until `running` reports false
    pub fn spin_until(&self, start: Duration, cycles: u64, running: impl Fn() -> bool) {
        if self.cycle_time.is_none() {
            return;
        }
        let deadline = start + self.budget(cycles);
        while self.clock.now() < deadline && running() {
            std::hint::spin_loop();
        }
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("cycle_time", &self.cycle_time)
            .finish()
    }
}
