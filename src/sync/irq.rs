//! Interrupt context tracking
//!
//! Claim and release of a mailbox channel must never run inside an interrupt
//! handler: they take the channel lock that the demultiplexer also takes, and
//! a task spinning on a lock held by an interrupt it preempted can never make
//! progress. The interrupt entry path marks the CPU as "in interrupt" for the
//! duration of the handler with [`IrqContext::enter`], and the mailbox checks
//! [`in_interrupt`] before touching the lock.
//!
//! The firmware targets a single-core lockstep cluster, so one nesting
//! counter is enough. Host unit tests run many threads at once, each of which
//! simulates its own CPU, so there the counter is thread-local.

#[cfg(not(test))]
mod depth {
    use core::sync::atomic::{AtomicUsize, Ordering};

    static IRQ_DEPTH: AtomicUsize = AtomicUsize::new(0);

    pub fn get() -> usize {
        IRQ_DEPTH.load(Ordering::Acquire)
    }

    pub fn enter() {
        IRQ_DEPTH.fetch_add(1, Ordering::AcqRel);
    }

    pub fn exit() {
        IRQ_DEPTH.fetch_sub(1, Ordering::AcqRel);
    }
}


/// Returns `true` while an interrupt handler is executing
pub fn in_interrupt() -> bool {
    depth::get() > 0
}

/// Guard marking interrupt context
///
/// Created by the interrupt entry path; dropping it leaves interrupt context.
/// Nests, so a higher-priority interrupt preempting a handler is tracked too.
pub struct IrqContext {
    _private: (),
}

impl IrqContext {
    pub fn enter() -> Self {
        depth::enter();
        IrqContext { _private: () }
    }
}

impl Drop for IrqContext {
    fn drop(&mut self) {
        depth::exit();
    }
}
