//! Real-time interrupt timer self-test
//!
//! Starts the timer with a periodic reset event, watches it for a number
//! of reset intervals against an independent [`Clock`], and checks that
//! the counter moved and that the event fired once per interval.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use log::{debug, error, info};

pub use crate::drivers::timer::Clock;

/// Reset intervals to observe
const OBSERVED_INTERVALS: u64 = 10;

/// Tolerated deviation of the event count from the interval count
const EVENT_SLACK: u64 = 1;

/// Reset-event callback, run in interrupt context
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// RTI timer instance under test
pub trait RtiTimer {
    /// Current counter value
    fn capture(&self) -> u64;
    fn subscribe(&self, cb: TimerCallback) -> Result<(), ()>;
    fn unsubscribe(&self) -> Result<(), ()>;
    fn start(&self) -> Result<(), ()>;
    fn stop(&self) -> Result<(), ()>;
}

/// Brings RTI timer instances up and down
pub trait RtiTimerDriver {
    type Timer: RtiTimer;

    fn probe(&self, base: usize, vector: u32) -> Option<Self::Timer>;
    fn remove(&self, timer: Self::Timer) -> Result<(), ()>;
}

/// Self-test failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTestError {
    Probe,
    Remove,
    Subscribe,
    Unsubscribe,
    Start,
    Stop,
    /// Counter did not move while the timer was running
    NoAdvance,
    /// Reset event count differs from the number of elapsed intervals
    UnexpectedEventCount,
}

impl TimerTestError {
    /// Numeric result code reported to the board test runner
    pub const fn code(self) -> u32 {
        match self {
            TimerTestError::Probe => 1,
            TimerTestError::Remove => 2,
            TimerTestError::Subscribe => 3,
            TimerTestError::Unsubscribe => 4,
            TimerTestError::Start => 5,
            TimerTestError::Stop => 6,
            TimerTestError::NoAdvance => 7,
            TimerTestError::UnexpectedEventCount => 8,
        }
    }
}

impl fmt::Display for TimerTestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerTestError::Probe => write!(f, "Probe failed"),
            TimerTestError::Remove => write!(f, "Remove failed"),
            TimerTestError::Subscribe => write!(f, "Subscribe failed"),
            TimerTestError::Unsubscribe => write!(f, "Unsubscribe failed"),
            TimerTestError::Start => write!(f, "Start failed"),
            TimerTestError::Stop => write!(f, "Stop failed"),
            TimerTestError::NoAdvance => write!(f, "Counter did not advance"),
            TimerTestError::UnexpectedEventCount => write!(f, "Unexpected event count"),
        }
    }
}

/// Exercise a probed timer
pub fn test_device<T: RtiTimer, C: Clock>(
    timer: &T,
    clock: &C,
    reset_interval_ns: u64,
) -> Result<(), TimerTestError> {
    let events = Arc::new(AtomicU32::new(0));
    let counter = events.clone();
    timer
        .subscribe(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .map_err(|_| TimerTestError::Subscribe)?;

    let result = run(timer, clock, reset_interval_ns, &events);

    let unsubscribed = timer.unsubscribe().map_err(|_| TimerTestError::Unsubscribe);
    result.and(unsubscribed)
}

fn run<T: RtiTimer, C: Clock>(
    timer: &T,
    clock: &C,
    reset_interval_ns: u64,
    events: &AtomicU32,
) -> Result<(), TimerTestError> {
    let window_us = (reset_interval_ns * OBSERVED_INTERVALS).div_ceil(1000);

    let before = timer.capture();
    timer.start().map_err(|_| TimerTestError::Start)?;

    let end = clock.now_us().saturating_add(window_us);
    while clock.now_us() < end {
        core::hint::spin_loop();
    }

    let after = timer.capture();
    let fired = events.load(Ordering::SeqCst) as u64;
    timer.stop().map_err(|_| TimerTestError::Stop)?;
    debug!("RTI: counter {} -> {}, {} events", before, after, fired);

    if after == before {
        error!("RTI: counter did not advance: {}", before);
        return Err(TimerTestError::NoAdvance);
    }
    if fired.abs_diff(OBSERVED_INTERVALS) > EVENT_SLACK {
        error!(
            "RTI: unexpected event count: {} (expected {})",
            fired, OBSERVED_INTERVALS
        );
        return Err(TimerTestError::UnexpectedEventCount);
    }
    Ok(())
}

/// Probe the timer at `base`, test it and remove it
pub fn test<D: RtiTimerDriver, C: Clock>(
    driver: &D,
    clock: &C,
    base: usize,
    vector: u32,
    reset_interval_ns: u64,
) -> Result<(), TimerTestError> {
    info!("RTI: test timer at {:#x} (vector {})", base, vector);
    let timer = driver.probe(base, vector).ok_or(TimerTestError::Probe)?;
    let result = test_device(&timer, clock, reset_interval_ns);
    let removed = driver.remove(timer).map_err(|_| TimerTestError::Remove);
    let result = result.and(removed);
    match result {
        Ok(()) => info!("RTI: timer at {:#x}: pass", base),
        Err(e) => error!("RTI: timer at {:#x}: {} ({})", base, e, e.code()),
    }
    result
}
