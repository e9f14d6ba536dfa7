//! Non-maskable interrupt line between the picture unit and the processor

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Edge-triggered request latch, consumed once per processor iteration
#[derive(Debug, Default)]
pub struct InterruptLine {
    pending: AtomicBool,
}

impl InterruptLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a request
    pub fn request(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Consume the latched request, if any
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Request-only view of an [`InterruptLine`], handed to collaborators
#[derive(Debug, Clone)]
pub struct InterruptRequester {
    line: Arc<InterruptLine>,
}

impl InterruptRequester {
    pub fn new(line: Arc<InterruptLine>) -> Self {
        Self { line }
    }

    pub fn request(&self) {
        self.line.request();
    }
}
