use std::sync::atomic::{AtomicBool, Ordering};

// Process-wide cancellation flag, polled at array/group/row boundaries
// during evaluation. The evaluator never clears it; the caller does.
static INTERRUPT: AtomicBool = AtomicBool::new(false);

/// Request that in-flight evaluations stop. Safe to call from a signal
/// handler or another thread.
pub fn interrupt() {
    INTERRUPT.store(true, Ordering::Relaxed);
}

pub fn interrupted() -> bool {
    INTERRUPT.load(Ordering::Relaxed)
}

pub fn reset_interrupt() {
    INTERRUPT.store(false, Ordering::Relaxed);
}
