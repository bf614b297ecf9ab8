//! Device drivers subsystem
//!
//! Organized by device class:
//! - `mailbox`: inter-processor mailbox
//! - `irqchip`: interrupt handler registration
//! - `console`: PL011 serial console
//! - `timer`: free-running system counter

pub mod console;
pub mod irqchip;
pub mod mailbox;
pub mod timer;
