//! Synchronization primitives
//!
//! This module provides interrupt-safe locking and interrupt context tracking.

pub mod irq;
pub mod mutex;

pub use irq::{IrqContext, in_interrupt};
pub use mutex::Mutex;
