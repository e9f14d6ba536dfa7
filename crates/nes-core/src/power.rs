//! Run-state coordination shared by every execution loop
//!
//! `PowerHandler` is a passive value: it is written by the control surface
//! and read by the loops. Each loop owns a [`RunGate`] that does the
//! waiting, so the handler itself never blocks.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// Process-wide run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerState {
    Off = 0,
    Run = 1,
    Suspended = 2,
    SingleStep = 3,
}

impl PowerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PowerState::Run,
            2 => PowerState::Suspended,
            3 => PowerState::SingleStep,
            _ => PowerState::Off,
        }
    }
}

/// Atomically updated run state
#[derive(Debug)]
pub struct PowerHandler {
    state: AtomicU8,
}

impl PowerHandler {
    pub fn new(initial: PowerState) -> Self {
        Self {
            state: AtomicU8::new(initial as u8),
        }
    }

    pub fn set_state(&self, state: PowerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Store `state` and return the one it replaced
    pub fn replace(&self, state: PowerState) -> PowerState {
        PowerState::from_u8(self.state.swap(state as u8, Ordering::SeqCst))
    }

    pub fn state(&self) -> PowerState {
        PowerState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

impl Default for PowerHandler {
    fn default() -> Self {
        Self::new(PowerState::Off)
    }
}

/// Per-loop wait condition plus the loop's "running" flag
#[derive(Debug)]
pub struct RunGate {
    running: AtomicBool,
    /// One iteration granted to this loop while suspended
    step_permit: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl RunGate {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            step_permit: AtomicBool::new(false),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the loop to terminate and wake it if blocked
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify();
    }

    /// Let this loop run one iteration even if another loop has already
    /// normalised a `SingleStep` state back to `Suspended`
    pub fn grant_step(&self) {
        self.step_permit.store(true, Ordering::SeqCst);
        self.notify();
    }

    /// Whether a granted step has not been taken yet
    pub fn step_pending(&self) -> bool {
        self.step_permit.load(Ordering::SeqCst)
    }

    /// Wake the loop so it re-reads the power state
    pub fn notify(&self) {
        // Taking the lock orders the wake-up after any waiter's predicate check
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.wake.notify_all();
    }

    /// Block while the power state is `Suspended`.
    ///
    /// Returns `false` once the gate has been stopped. A `SingleStep` or
    /// `Off` state seen on wake is normalised to `Suspended`, so the caller
    /// runs exactly one more iteration before blocking again. A pending
    /// step permit is consumed the same way.
    pub fn wait_for_permission(&self, power: &PowerHandler) -> bool {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self
            .wake
            .wait_while(guard, |_| {
                power.state() == PowerState::Suspended
                    && self.is_running()
                    && !self.step_permit.load(Ordering::SeqCst)
            })
            .unwrap_or_else(PoisonError::into_inner);

        if !self.is_running() {
            return false;
        }

        self.step_permit.store(false, Ordering::SeqCst);
        if matches!(power.state(), PowerState::SingleStep | PowerState::Off) {
            power.set_state(PowerState::Suspended);
        }
        true
    }
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_power_state_roundtrip() {
        let power = PowerHandler::new(PowerState::Off);
        for state in [
            PowerState::Run,
            PowerState::Suspended,
            PowerState::SingleStep,
            PowerState::Off,
        ] {
            power.set_state(state);
            assert_eq!(power.state(), state);
        }
    }

    #[test]
    fn test_run_passes_through() {
        let power = PowerHandler::new(PowerState::Run);
        let gate = RunGate::new();
        assert!(gate.wait_for_permission(&power));
        assert_eq!(power.state(), PowerState::Run);
    }

    #[test]
    fn test_single_step_normalises() {
        let power = PowerHandler::new(PowerState::SingleStep);
        let gate = RunGate::new();
        assert!(gate.wait_for_permission(&power));
        assert_eq!(power.state(), PowerState::Suspended);

        let power = PowerHandler::new(PowerState::Off);
        assert!(gate.wait_for_permission(&power));
        assert_eq!(power.state(), PowerState::Suspended);
    }

    #[test]
    fn test_stopped_gate_refuses() {
        let power = PowerHandler::new(PowerState::Run);
        let gate = RunGate::new();
        gate.stop();
        assert!(!gate.wait_for_permission(&power));
    }

    #[test]
    fn test_step_permit_survives_normalisation() {
        let power = Arc::new(PowerHandler::new(PowerState::Suspended));
        let gate = Arc::new(RunGate::new());

        let waiter = {
            let power = Arc::clone(&power);
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_for_permission(&power))
        };

        thread::sleep(Duration::from_millis(20));
        gate.grant_step();
        assert!(waiter.join().unwrap());
        assert_eq!(power.state(), PowerState::Suspended);

        assert!(!gate.step_permit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_wakes_suspended_waiter() {
        let power = Arc::new(PowerHandler::new(PowerState::Suspended));
        let gate = Arc::new(RunGate::new());

        let waiter = {
            let power = Arc::clone(&power);
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_for_permission(&power))
        };

        thread::sleep(Duration::from_millis(20));
        gate.stop();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_resume_wakes_suspended_waiter() {
        let power = Arc::new(PowerHandler::new(PowerState::Suspended));
        let gate = Arc::new(RunGate::new());

        let waiter = {
            let power = Arc::clone(&power);
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_for_permission(&power))
        };

        thread::sleep(Duration::from_millis(20));
        power.set_state(PowerState::Run);
        gate.notify();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_replace_returns_previous() {
        let power = PowerHandler::new(PowerState::Run);
        assert_eq!(power.replace(PowerState::SingleStep), PowerState::Run);
        assert_eq!(power.state(), PowerState::SingleStep);
    }
}
