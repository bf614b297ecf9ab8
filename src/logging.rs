//! Console logger
//!
//! Routes the `log` facade to a serial console. Records are written with
//! the IRQ-disabling [`Mutex`] held, so logging from an interrupt handler
//! never interleaves with (or deadlocks against) a task that was logging.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record};
use spin::Once;

use crate::drivers::console::Pl011;
use crate::sync::Mutex;

/// Logger installation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerError {
    /// A global logger is already installed
    AlreadyInstalled,
}

impl fmt::Display for LoggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggerError::AlreadyInstalled => write!(f, "Logger already installed"),
        }
    }
}

/// `log` backend writing one line per record
pub struct ConsoleLogger<W> {
    writer: Mutex<W>,
    level: LevelFilter,
}

impl<W: Write + Send> ConsoleLogger<W> {
    pub const fn new(writer: W, level: LevelFilter) -> Self {
        ConsoleLogger {
            writer: Mutex::new(writer),
            level,
        }
    }
}

impl<W: Write + Send> Log for ConsoleLogger<W> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut writer = self.writer.lock();
        // Nowhere to report a console failure
        let _ = writeln!(writer, "[{:<5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: Once<ConsoleLogger<Pl011>> = Once::new();

/// Install the PL011 at `base` as the global logger
///
/// The UART must already be configured (by firmware or [`Pl011::init`]).
///
/// # Safety
/// `base` must map a PL011 for the rest of the program, not written by
/// anything else.
pub unsafe fn init(base: usize, level: LevelFilter) -> Result<(), LoggerError> {
    let logger = LOGGER.call_once(|| {
        // SAFETY: Forwarded to the caller
        ConsoleLogger::new(unsafe { Pl011::new(base) }, level)
    });
    log::set_logger(logger).map_err(|_| LoggerError::AlreadyInstalled)?;
    log::set_max_level(level);
    Ok(())
}
