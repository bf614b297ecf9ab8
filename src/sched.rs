//! Scheduler seam
//!
//! The link layer blocks the requesting task and wakes it from interrupt
//! context. It does not own a scheduler; the RTOS provides one through the
//! [`Scheduler`] trait.

use core::fmt;
use core::num::NonZeroU32;

/// Identity of a schedulable task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(NonZeroU32);

impl TaskId {
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(id) => Some(TaskId(id)),
            None => None,
        }
    }

    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

/// How long a blocking wait may last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Forever,
    Millis(u32),
}

impl Timeout {
    /// Negative values mean "wait forever"
    pub const fn from_ms(ms: i32) -> Self {
        if ms < 0 {
            Timeout::Forever
        } else {
            Timeout::Millis(ms as u32)
        }
    }

    /// Absolute deadline relative to `now_ms`, `None` for `Forever`
    pub fn deadline(self, now_ms: u64) -> Option<u64> {
        match self {
            Timeout::Forever => None,
            Timeout::Millis(ms) => Some(now_ms.saturating_add(ms as u64)),
        }
    }
}

/// Scheduler errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// The task does not exist (or no longer exists)
    InvalidTask,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::InvalidTask => write!(f, "Invalid task"),
        }
    }
}

/// Task blocking and wakeup provided by the RTOS
pub trait Scheduler: Send + Sync {
    /// Task executing the call
    fn current_task(&self) -> TaskId;

    /// Block the calling task until `unblock`, the timeout, or a spurious
    /// wakeup. An `unblock` issued before the task blocks is not lost: the
    /// next `block` returns immediately.
    fn block(&self, timeout: Timeout);

    /// Wake `task`. Callable from interrupt context.
    fn unblock(&self, task: TaskId) -> Result<(), SchedError>;

    /// Monotonic milliseconds since boot
    fn uptime_ms(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_timeout_is_forever() {
        assert_eq!(Timeout::from_ms(-1), Timeout::Forever);
        assert_eq!(Timeout::from_ms(0), Timeout::Millis(0));
        assert_eq!(Timeout::from_ms(500), Timeout::Millis(500));
    }

    #[test]
    fn test_deadline() {
        assert_eq!(Timeout::Forever.deadline(10), None);
        assert_eq!(Timeout::Millis(5).deadline(10), Some(15));
        assert_eq!(Timeout::Millis(5).deadline(u64::MAX), Some(u64::MAX));
    }

    #[test]
    fn test_task_id_rejects_zero() {
        assert!(TaskId::new(0).is_none());
        assert_eq!(TaskId::new(9).map(TaskId::get), Some(9));
    }
}
