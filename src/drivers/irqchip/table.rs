//! Fixed-size interrupt handler table
//!
//! One slot per controller line. The exception vector acknowledges the
//! interrupt at the controller, calls [`HandlerTable::dispatch`] with the
//! line number, and signals end-of-interrupt afterwards.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use log::{debug, warn};

use super::{IrqController, IrqError, IrqHandler};
use crate::sync::{IrqContext, Mutex};

/// Number of lines the table covers (GIC-400 SPI range on the target SoC)
pub const MAX_LINES: usize = 256;

/// Unknown-line warnings printed before going quiet
const UNKNOWN_LINE_REPORTS: u32 = 10;

struct Slot {
    name: &'static str,
    handler: IrqHandler,
}

/// Interrupt handler table
pub struct HandlerTable {
    slots: Mutex<[Option<Slot>; MAX_LINES]>,
    unknown: AtomicU32,
}

impl HandlerTable {
    pub fn new() -> Self {
        HandlerTable {
            slots: Mutex::new([const { None }; MAX_LINES]),
            unknown: AtomicU32::new(0),
        }
    }

    /// Name of the handler installed on `line`, if any
    pub fn installed(&self, line: u32) -> Option<&'static str> {
        let slots = self.slots.lock();
        slots
            .get(line as usize)
            .and_then(|slot| slot.as_ref().map(|s| s.name))
    }

    /// Run the handler of `line` in interrupt context
    ///
    /// Returns `false` if no handler is installed. The table lock is dropped
    /// before the handler runs so a handler may be removed from task context
    /// while another line is being serviced.
    pub fn dispatch(&self, line: u32) -> bool {
        let handler = {
            let slots = self.slots.lock();
            slots
                .get(line as usize)
                .and_then(|slot| slot.as_ref().map(|s| s.handler.clone()))
        };

        let Some(handler) = handler else {
            let count = self.unknown.fetch_add(1, Ordering::Relaxed);
            if count < UNKNOWN_LINE_REPORTS {
                warn!("[IRQ] Unknown interrupt ID: {} (count: {})", line, count + 1);
            }
            return false;
        };

        let _ctx = IrqContext::enter();
        handler();
        true
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqController for HandlerTable {
    fn install(&self, line: u32, name: &'static str, handler: IrqHandler) -> Result<(), IrqError> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(line as usize).ok_or(IrqError::InvalidLine)?;
        if slot.is_some() {
            return Err(IrqError::AlreadyInstalled);
        }
        debug!("[IRQ] {}: install handler on line {}", name, line);
        *slot = Some(Slot { name, handler });
        Ok(())
    }

    fn remove(&self, line: u32, handler: &IrqHandler) -> Result<(), IrqError> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(line as usize).ok_or(IrqError::InvalidLine)?;
        match slot {
            Some(s) if Arc::ptr_eq(&s.handler, handler) => {
                debug!("[IRQ] {}: remove handler from line {}", s.name, line);
                *slot = None;
                Ok(())
            }
            Some(_) => Err(IrqError::WrongHandler),
            None => Err(IrqError::NotInstalled),
        }
    }
}
