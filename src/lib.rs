//! Mailbox channel management and request/reply links for the real-time
//! processing subsystem
//!
//! - `drivers::mailbox`: channel claim/release, payload transfer, event
//!   signalling and interrupt demultiplexing for the inter-processor mailbox
//! - `drivers::irqchip`: interrupt handler registration
//! - `link`: request/reply endpoints over mailbox channels
//! - `sched`: the blocking/wakeup services the link layer needs from the RTOS
//! - `selftest`: on-target driver self-tests
//! - `logging`: `log` backend on the serial console

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod drivers;
pub mod link;
pub mod logging;
pub mod sched;
pub mod selftest;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;
