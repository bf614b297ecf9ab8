//! Inter-processor mailbox
//!
//! The mailbox block connects the real-time cores with the other processor
//! domains of the SoC. It is a bank of channels, each with a configuration
//! register that records which domain owns it, a 64-byte payload and two
//! event bits. Two interrupt lines per device carry event A ("data
//! arrived") and event B ("peer acknowledged") for all channels at once.
//!
//! - `regs`: register layout and access ([`RegisterBank`], [`MmioBank`])
//! - `channel`: per-channel state and claim-time callbacks
//! - `device`: the [`Mailbox`] itself: claim/release, data transfer, event
//!   primitives, interrupt demultiplexing

pub mod channel;
pub mod device;
pub mod regs;

pub use channel::{Callback, ChannelCallbacks};
pub use device::{IrqLine, Mailbox, MailboxConfig, MailboxError};
pub use regs::{ChannelConfig, DATA_SIZE, Event, MmioBank, RegisterBank};
