//! Free-running system counter
//!
//! A 64-bit counter that increments at 1 MHz and can be neither stopped nor
//! reset. Used as the time base for the driver self-tests.
//!
//! ## Register Layout
//!
//! | Offset | Register | Purpose |
//! |--------|----------|---------|
//! | +0x00  | CS       | Control/Status |
//! | +0x04  | CLO      | Counter Lower 32 bits |
//! | +0x08  | CHI      | Counter Upper 32 bits |

use core::ptr;

/// Register offsets from the timer base
mod offset {
    pub const CLO: usize = 0x04; // Counter Lower 32 bits
    pub const CHI: usize = 0x08; // Counter Higher 32 bits
}

/// Monotonic microsecond time source
pub trait Clock {
    fn now_us(&self) -> u64;
}

/// System counter at a fixed base address
pub struct SystemTimer {
    base: usize,
}

impl SystemTimer {
    /// # Safety
    /// `base` must map the counter registers for the lifetime of the timer.
    pub const unsafe fn new(base: usize) -> Self {
        SystemTimer { base }
    }

    #[inline]
    fn read_reg(&self, offset: usize) -> u32 {
        // SAFETY: `new` requires `base` to map the counter registers; both
        // offsets are 4-byte aligned and reads have no side effects
        unsafe { ptr::read_volatile((self.base + offset) as *const u32) }
    }

    /// Read the full 64-bit counter
    ///
    /// CLO may roll over between the two halves being read, so CHI is read
    /// on both sides of CLO and the read retried until they agree.
    pub fn read_counter(&self) -> u64 {
        loop {
            let hi1 = self.read_reg(offset::CHI);
            let lo = self.read_reg(offset::CLO);
            let hi2 = self.read_reg(offset::CHI);

            if hi1 == hi2 {
                return ((hi1 as u64) << 32) | (lo as u64);
            }
        }
    }
}

impl Clock for SystemTimer {
    fn now_us(&self) -> u64 {
        self.read_counter()
    }
}
