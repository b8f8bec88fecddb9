//! Single-slot admission gate: at most one frame in flight.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Idle/Busy flag shared by every context that submits or finishes frames.
#[derive(Debug, Default)]
pub struct FrameGate {
    busy: AtomicBool,
}

/// Proof that the gate is held. Dropping it returns the gate to Idle.
#[derive(Debug)]
pub struct BusyPermit {
    gate: Arc<FrameGate>,
}

impl FrameGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Idle → Busy. Fails without blocking when another frame holds the gate.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BusyPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyPermit { gate: self.clone() })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for BusyPermit {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}
