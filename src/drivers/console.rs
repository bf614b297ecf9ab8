//! PL011 UART console
//!
//! Polling transmit-only driver used as the log sink. The real-time cluster
//! shares the UART with other domains, so the driver never touches pin
//! muxing and only reprograms the divisors it is asked to.

use core::fmt;
use volatile::Volatile;

/// PL011 register bits
///
/// Reference: [ARM PL011 TRM](https://developer.arm.com/documentation/ddi0183/latest/)
mod pl011_flags {
    pub const FR_TXFF: u32 = 1 << 5; // Transmit FIFO full

    pub const LCRH_FEN: u32 = 1 << 4; // FIFO enable
    pub const LCRH_WLEN_8BIT: u32 = 0b11 << 5; // 8-bit word length

    pub const CR_UARTEN: u32 = 1 << 0; // UART enable
    pub const CR_TXE: u32 = 1 << 8; // Transmit enable

    pub const ICR_ALL: u32 = 0x7FF; // Clear all interrupts
}

/// PL011 register offsets
#[repr(C)]
struct Pl011Registers {
    dr: Volatile<u32>, // 0x00 - Data Register
    _rsv0: [u32; 5],
    fr: Volatile<u32>, // 0x18 - Flag Register
    _rsv1: [u32; 2],
    ibrd: Volatile<u32>, // 0x24 - Integer Baud Rate Divisor
    fbrd: Volatile<u32>, // 0x28 - Fractional Baud Rate Divisor
    lcrh: Volatile<u32>, // 0x2C - Line Control Register
    cr: Volatile<u32>,   // 0x30 - Control Register
    _rsv2: [u32; 1],
    imsc: Volatile<u32>, // 0x38 - Interrupt Mask Set/Clear
    _rsv3: [u32; 2],
    icr: Volatile<u32>, // 0x44 - Interrupt Clear Register
}

/// Size of the register window the driver touches
pub const PL011_WINDOW: usize = core::mem::size_of::<Pl011Registers>();

/// PL011 console writer
pub struct Pl011 {
    registers: &'static mut Pl011Registers,
}

impl Pl011 {
    /// Create a writer for the UART mapped at `base`
    ///
    /// # Safety
    /// `base` must map a PL011 for the rest of the program and no other
    /// writer may exist for it.
    pub unsafe fn new(base: usize) -> Self {
        Pl011 {
            // SAFETY: Guaranteed by the caller; Pl011Registers matches the
            // PL011 register layout (TRM section 3.2)
            registers: unsafe { &mut *(base as *mut Pl011Registers) },
        }
    }

    /// Program 8N1 with FIFOs at `baud`, given the UART reference clock
    pub fn init(&mut self, clock_hz: u32, baud: u32) {
        self.registers.cr.write(0);
        self.registers.imsc.write(0);
        self.registers.icr.write(pl011_flags::ICR_ALL);

        // Divisor in 1/64ths: clock / (16 * baud) * 64, rounded
        let div = (4 * clock_hz as u64 + baud as u64 / 2) / baud as u64;
        self.registers.ibrd.write((div >> 6) as u32);
        self.registers.fbrd.write((div & 0x3f) as u32);

        self.registers
            .lcrh
            .write(pl011_flags::LCRH_FEN | pl011_flags::LCRH_WLEN_8BIT);
        self.registers
            .cr
            .write(pl011_flags::CR_UARTEN | pl011_flags::CR_TXE);
    }

    pub fn write_byte(&mut self, byte: u8) {
        while (self.registers.fr.read() & pl011_flags::FR_TXFF) != 0 {
            core::hint::spin_loop();
        }
        self.registers.dr.write(byte as u32);
    }

    pub fn write_string(&mut self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

impl fmt::Write for Pl011 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_string(s);
        Ok(())
    }
}
