//! Mailbox channel register model
//!
//! Each channel of the mailbox owns one 80-byte register block:
//!
//! | Offset | Register                  | Purpose |
//! |--------|---------------------------|---------|
//! | +0x00  | CONFIG                    | unsecure / owner / source / destination |
//! | +0x04  | EVENT_CAUSE (read)        | events raised on this channel |
//! |        | EVENT_STATUS_CLEAR (write)| write-1-to-clear event status |
//! | +0x08  | EVENT_STATUS (read)       | current event status |
//! |        | EVENT_STATUS_SET (write)  | write-1-to-set event status |
//! | +0x0C  | EVENT_ENABLE              | per-interrupt-line enable bits |
//! | +0x10  | DATA[0..16]               | payload |
//!
//! CONFIG layout: unsecure flag (bit 0), owner (bits 8-15), source
//! (bits 16-23), destination (bits 24-31). Writing CONFIG while another
//! owner holds the slot has no effect, which is what makes read-after-write
//! usable as a cross-processor ownership arbiter.
//!
//! Event A (bit 0) means "data has arrived", event B (bit 1) means "the peer
//! consumed what I sent". Event A is routed to interrupt line `idx` through
//! enable bit `2 * idx`, event B through enable bit `2 * idx + 1`.

use core::ptr;

use bitflags::bitflags;

/// Number of 32-bit payload registers per channel
pub const DATA_REGS: usize = 16;

/// Payload capacity of a channel in bytes
pub const DATA_SIZE: usize = DATA_REGS * core::mem::size_of::<u32>();

/// Largest channel count a mailbox instance can carry
pub const MAX_CHANNELS: usize = 32;

/// CONFIG register fields
mod config {
    pub const UNSECURE: u32 = 0x1;
    pub const OWNER_SHIFT: u32 = 8;
    pub const OWNER_MASK: u32 = 0x0000_ff00;
    pub const SRC_SHIFT: u32 = 16;
    pub const SRC_MASK: u32 = 0x00ff_0000;
    pub const DEST_SHIFT: u32 = 24;
    pub const DEST_MASK: u32 = 0xff00_0000;
}

bitflags! {
    /// Event bits as they appear in the cause/status registers
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Events: u32 {
        /// Event A: data has arrived
        const RECEIVE = 0x1;
        /// Event B: the peer accepted what was sent
        const ACK = 0x2;
    }
}

/// The two event types a channel can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Receive,
    Ack,
}

impl Event {
    /// Bit of this event in the cause/status registers
    pub const fn bits(self) -> Events {
        match self {
            Event::Receive => Events::RECEIVE,
            Event::Ack => Events::ACK,
        }
    }

    /// EVENT_ENABLE bit routing this event to interrupt line `line_index`
    pub const fn enable_bit(self, line_index: u32) -> u32 {
        match self {
            Event::Receive => 1 << (2 * line_index),
            Event::Ack => 1 << (2 * line_index + 1),
        }
    }
}

/// Decoded CONFIG register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelConfig {
    pub unsecure: bool,
    pub owner: u8,
    pub source: u8,
    pub destination: u8,
}

impl ChannelConfig {
    /// Configuration written by an owning claimer
    pub const fn owned(owner: u8, source: u8, destination: u8) -> Self {
        ChannelConfig {
            unsecure: true,
            owner,
            source,
            destination,
        }
    }

    pub const fn encode(&self) -> u32 {
        let mut val = 0;
        if self.unsecure {
            val |= config::UNSECURE;
        }
        val |= ((self.owner as u32) << config::OWNER_SHIFT) & config::OWNER_MASK;
        val |= ((self.source as u32) << config::SRC_SHIFT) & config::SRC_MASK;
        val |= ((self.destination as u32) << config::DEST_SHIFT) & config::DEST_MASK;
        val
    }

    pub const fn decode(val: u32) -> Self {
        ChannelConfig {
            unsecure: val & config::UNSECURE != 0,
            owner: ((val & config::OWNER_MASK) >> config::OWNER_SHIFT) as u8,
            source: ((val & config::SRC_MASK) >> config::SRC_SHIFT) as u8,
            destination: ((val & config::DEST_MASK) >> config::DEST_SHIFT) as u8,
        }
    }
}

/// Register selector within a channel block
///
/// `CauseClear` and `StatusSet` each name one physical register whose read
/// and write sides have different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Config,
    /// Read: EVENT_CAUSE. Write: EVENT_STATUS_CLEAR.
    CauseClear,
    /// Read: EVENT_STATUS. Write: EVENT_STATUS_SET.
    StatusSet,
    Enable,
    Data(usize),
}

/// Access to the register blocks of every channel of one mailbox
///
/// Every read and write reaches the device; implementations must not cache,
/// merge, or reorder accesses.
pub trait RegisterBank: Send + Sync {
    fn read(&self, instance: usize, reg: Register) -> u32;
    fn write(&self, instance: usize, reg: Register, value: u32);
}

impl<T: RegisterBank + ?Sized> RegisterBank for alloc::sync::Arc<T> {
    fn read(&self, instance: usize, reg: Register) -> u32 {
        (**self).read(instance, reg)
    }

    fn write(&self, instance: usize, reg: Register, value: u32) {
        (**self).write(instance, reg, value)
    }
}

/// Hardware register block of one channel
#[repr(C)]
struct ChannelBlock {
    config: u32,      // 0x00
    cause_clear: u32, // 0x04
    status_set: u32,  // 0x08
    enable: u32,      // 0x0C
    data: [u32; DATA_REGS],
}

/// Distance between consecutive channel blocks
pub const BLOCK_SIZE: usize = core::mem::size_of::<ChannelBlock>();

/// Memory-mapped register bank
///
/// The demultiplexer reads a block from interrupt context while a task may
/// be writing the same block, so no reference to a block is ever formed:
/// every access is a single volatile load or store through a raw pointer.
pub struct MmioBank {
    base: usize,
    channels: usize,
}

impl MmioBank {
    /// Create a register bank for a mailbox mapped at `base`
    ///
    /// # Safety
    /// The caller must ensure:
    /// - `base` is the device-mapped address of a mailbox with at least
    ///   `channels` channel blocks
    /// - The mapping stays valid for the lifetime of this bank
    pub const unsafe fn new(base: usize, channels: usize) -> Self {
        MmioBank { base, channels }
    }

    fn reg(&self, instance: usize, reg: Register) -> *mut u32 {
        assert!(instance < self.channels, "channel {} out of range", instance);
        let block = (self.base + instance * BLOCK_SIZE) as *mut ChannelBlock;
        // SAFETY: Only field addresses are computed, nothing is dereferenced:
        // 1. `new` requires `base` to map `channels` consecutive blocks
        // 2. `instance` was bounds-checked above, `Data(i)` is checked by indexing
        // 3. ChannelBlock is repr(C) and matches the hardware layout
        unsafe {
            match reg {
                Register::Config => ptr::addr_of_mut!((*block).config),
                Register::CauseClear => ptr::addr_of_mut!((*block).cause_clear),
                Register::StatusSet => ptr::addr_of_mut!((*block).status_set),
                Register::Enable => ptr::addr_of_mut!((*block).enable),
                Register::Data(i) => {
                    assert!(i < DATA_REGS, "data register {} out of range", i);
                    ptr::addr_of_mut!((*block).data).cast::<u32>().add(i)
                }
            }
        }
    }
}

impl RegisterBank for MmioBank {
    fn read(&self, instance: usize, reg: Register) -> u32 {
        // SAFETY: `reg` yields an aligned address inside the mapped block
        unsafe { ptr::read_volatile(self.reg(instance, reg)) }
    }

    fn write(&self, instance: usize, reg: Register, value: u32) {
        // SAFETY: `reg` yields an aligned address inside the mapped block
        unsafe { ptr::write_volatile(self.reg(instance, reg), value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_bit_layout() {
        let cfg = ChannelConfig::owned(0x11, 0x22, 0x33);
        assert_eq!(cfg.encode(), 0x3322_1101);
        assert_eq!(ChannelConfig::decode(0x3322_1101), cfg);
        assert_eq!(ChannelConfig::decode(0), ChannelConfig::default());
    }

    #[test]
    fn test_enable_bits_per_line() {
        assert_eq!(Event::Receive.enable_bit(0), 0b01);
        assert_eq!(Event::Ack.enable_bit(0), 0b10);
        assert_eq!(Event::Receive.enable_bit(3), 1 << 6);
        assert_eq!(Event::Ack.enable_bit(3), 1 << 7);
    }

    #[test]
    fn test_block_layout_matches_hardware() {
        assert_eq!(BLOCK_SIZE, 0x50);
        assert_eq!(DATA_SIZE, 64);
    }

    #[test]
    fn test_mmio_bank_addresses_blocks() {
        let mut mem = vec![0u32; 2 * BLOCK_SIZE / 4];
        let bank = unsafe { MmioBank::new(mem.as_mut_ptr() as usize, 2) };

        bank.write(1, Register::Config, 0xdead_beef);
        bank.write(0, Register::Data(15), 7);
        assert_eq!(bank.read(1, Register::Config), 0xdead_beef);

        drop(bank);
        assert_eq!(mem[BLOCK_SIZE / 4], 0xdead_beef);
        assert_eq!(mem[4 + 15], 7);
    }

    #[test]
    fn test_mmio_block_shared_between_contexts() {
        let mut mem = vec![0u32; BLOCK_SIZE / 4];
        let bank = unsafe { MmioBank::new(mem.as_mut_ptr() as usize, 1) };

        // A task filling the payload while the demultiplexer polls the
        // cause and enable registers of the same block
        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..1000u32 {
                    bank.write(0, Register::Data(i as usize % DATA_REGS), i);
                }
            });
            for _ in 0..1000 {
                assert_eq!(bank.read(0, Register::CauseClear), 0);
                assert_eq!(bank.read(0, Register::Enable), 0);
            }
        });

        drop(bank);
        assert_eq!(mem[4 + 999 % DATA_REGS], 999);
    }

    #[test]
    #[should_panic(expected = "data register 16 out of range")]
    fn test_mmio_data_index_checked() {
        let mut mem = vec![0u32; BLOCK_SIZE / 4];
        let bank = unsafe { MmioBank::new(mem.as_mut_ptr() as usize, 1) };
        bank.read(0, Register::Data(DATA_REGS));
    }
}
