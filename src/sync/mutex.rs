//! Interrupt-safe mutex
//!
//! This module provides `Mutex`, a spinlock that disables interrupts while
//! the lock is held. Every lock shared between task context and an interrupt
//! handler (the per-channel mailbox lock, the link reply slot, the command
//! queue) is one of these.
//!
//! ## Why disable interrupts?
//!
//! Regular spinlocks deadlock if an interrupt tries to acquire a lock
//! that the interrupted code already holds:
//!
//! ```text
//! 1. Task claims a mailbox channel (takes the channel lock)
//! 2. Mailbox interrupt fires on the same CPU
//! 3. Demultiplexer tries to take the same channel lock
//! 4. DEADLOCK: Handler spins forever, task never resumes
//! ```
//!
//! ## Implementation
//!
//! 1. Save current IRQ state
//! 2. Disable interrupts
//! 3. Acquire spinlock
//! 4. On drop: Release lock, restore IRQ state
//!
//! The DAIF manipulation only exists on bare-metal AArch64. On any other
//! target (host unit tests) the IRQ state save/restore is a no-op and the
//! type degrades to a plain spinlock.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Mutex that disables interrupts while locked
///
/// # Example
/// ```ignore
/// let chan = Mutex::new(ChannelState::new());
///
/// let mut state = chan.lock();
/// state.active = true;
/// // Interrupts re-enabled when guard is dropped
/// ```
pub struct Mutex<T> {
    inner: UnsafeCell<T>,
    locked: AtomicBool,
}

// SAFETY: Mutex is Sync because:
// - Access to inner data is protected by atomic `locked` flag
// - IRQs are disabled while lock is held (prevents concurrent interrupt access)
// - Only one thread/CPU can hold the lock at a time
unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create a new mutex
    pub const fn new(value: T) -> Self {
        Self {
            inner: UnsafeCell::new(value),
            locked: AtomicBool::new(false),
        }
    }

    /// Acquire the lock (disables interrupts)
    ///
    /// Returns a guard that will restore interrupts when dropped.
    /// Spins if the lock is already held (should be rare - locks held briefly).
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let irq_state = IrqState::disable();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        MutexGuard {
            mutex: self,
            irq_state,
        }
    }
}

/// Guard returned by `Mutex::lock()`
///
/// Restores interrupt state when dropped.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    irq_state: IrqState,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Lock is held, so we have exclusive access
        unsafe { &*self.mutex.inner.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Lock is held, so we have exclusive access
        unsafe { &mut *self.mutex.inner.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
        self.irq_state.restore();
    }
}

/// Saved IRQ state (from DAIF register)
///
/// DAIF = Debug, SError, IRQ, FIQ mask bits
/// We only care about IRQ (bit 1) for this implementation.
struct IrqState {
    #[cfg_attr(not(all(target_arch = "aarch64", target_os = "none")), allow(dead_code))]
    daif: u64,
}

impl IrqState {
    /// Disable IRQs and return previous state
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    fn disable() -> Self {
        let daif: u64;

        // SAFETY: Reading/writing DAIF is safe because:
        // 1. DAIF is accessible at EL1 (our exception level)
        // 2. MSR daifset disables interrupts atomically
        // 3. We save the old value to restore later
        unsafe {
            core::arch::asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack));
            core::arch::asm!("msr daifset, #2", options(nomem, nostack));
        }

        Self { daif }
    }

    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    fn disable() -> Self {
        Self { daif: 0 }
    }

    /// Restore previous IRQ state
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    fn restore(&self) {
        // SAFETY: Restoring DAIF is safe because:
        // 1. We're restoring a value we previously saved
        // 2. DAIF write is atomic (single MSR instruction)
        unsafe {
            core::arch::asm!("msr daif, {}", in(reg) self.daif, options(nomem, nostack));
        }
    }

    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    fn restore(&self) {}
}
