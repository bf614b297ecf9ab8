//! Interrupt handler registration
//!
//! Drivers do not talk to the interrupt controller directly. They install a
//! handler for a physical line through [`IrqController`] and the exception
//! vector routes each acknowledged interrupt to it through the global
//! [`IRQ_HANDLERS`] table.

pub mod table;

use alloc::sync::Arc;
use core::fmt;
use lazy_static::lazy_static;

pub use table::HandlerTable;

/// Handler invoked in interrupt context for one physical line
///
/// Handlers must not block or allocate.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// Errors from handler installation and removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// Line number beyond what the controller supports
    InvalidLine,
    /// Another handler already owns this line
    AlreadyInstalled,
    /// No handler is installed on this line
    NotInstalled,
    /// The line carries a handler other than the one being removed
    WrongHandler,
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrqError::InvalidLine => write!(f, "Invalid interrupt line"),
            IrqError::AlreadyInstalled => write!(f, "Handler already installed"),
            IrqError::NotInstalled => write!(f, "No handler installed"),
            IrqError::WrongHandler => write!(f, "Line owned by another handler"),
        }
    }
}

/// Interrupt handler registry
pub trait IrqController: Send + Sync {
    /// Install `handler` as the unique handler of `line`
    fn install(&self, line: u32, name: &'static str, handler: IrqHandler) -> Result<(), IrqError>;

    /// Remove `handler` from `line`
    ///
    /// Fails without touching the line if it carries a different handler.
    fn remove(&self, line: u32, handler: &IrqHandler) -> Result<(), IrqError>;
}

lazy_static! {
    /// System-wide handler table, dispatched from the IRQ exception vector
    pub static ref IRQ_HANDLERS: Arc<HandlerTable> = Arc::new(HandlerTable::new());
}

/// Route an acknowledged interrupt to its handler
///
/// Called by the IRQ exception vector between acknowledge and
/// end-of-interrupt. Returns `false` for a line with no handler.
pub fn dispatch(line: u32) -> bool {
    IRQ_HANDLERS.dispatch(line)
}
