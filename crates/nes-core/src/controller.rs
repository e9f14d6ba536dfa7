//! Standard controller state
//!
//! The front end sets buttons from any thread; the processor loop copies
//! the packed byte into the controller port every iteration.

use bitflags::bitflags;
use std::sync::atomic::{AtomicU8, Ordering};

bitflags! {
    /// Button bits as they appear on the controller port
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u8 {
        const A = 0b0000_0001;
        const B = 0b0000_0010;
        const SELECT = 0b0000_0100;
        const START = 0b0000_1000;
        const UP = 0b0001_0000;
        const DOWN = 0b0010_0000;
        const LEFT = 0b0100_0000;
        const RIGHT = 0b1000_0000;
    }
}

/// Shared button state
#[derive(Debug, Default)]
pub struct Controller {
    state: AtomicU8,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Press or release one or more buttons
    pub fn set(&self, buttons: Buttons, pressed: bool) {
        if pressed {
            self.state.fetch_or(buttons.bits(), Ordering::Relaxed);
        } else {
            self.state.fetch_and(!buttons.bits(), Ordering::Relaxed);
        }
    }

    pub fn buttons(&self) -> Buttons {
        Buttons::from_bits_truncate(self.bits())
    }

    /// Packed byte written to the controller port
    pub fn bits(&self) -> u8 {
        self.state.load(Ordering::Relaxed)
    }
}
