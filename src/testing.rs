//! Host-side stand-ins for hardware and RTOS
//!
//! `SimBank` models the mailbox register semantics that plain memory cannot:
//! write-1-to-set status, write-1-to-clear cause, and CONFIG writes that do
//! not stick while another owner holds the slot. `ThreadScheduler` maps
//! tasks onto std threads with park/unpark token semantics.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use crate::drivers::mailbox::regs::{
    ChannelConfig, DATA_REGS, DATA_SIZE, Events, Register, RegisterBank,
};
use crate::sched::{SchedError, Scheduler, TaskId, Timeout};

struct SimChannel {
    config: AtomicU32,
    status: AtomicU32,
    enable: AtomicU32,
    data: [AtomicU32; DATA_REGS],
}

impl SimChannel {
    fn new() -> Self {
        SimChannel {
            config: AtomicU32::new(0),
            status: AtomicU32::new(0),
            enable: AtomicU32::new(0),
            data: [const { AtomicU32::new(0) }; DATA_REGS],
        }
    }
}

/// Software model of a mailbox register bank
pub struct SimBank {
    channels: Vec<SimChannel>,
}

impl SimBank {
    pub fn new(channels: usize) -> Self {
        SimBank {
            channels: (0..channels).map(|_| SimChannel::new()).collect(),
        }
    }

    /// Install a configuration as if another processor claimed the slot
    pub fn force_config(&self, instance: usize, cfg: ChannelConfig) {
        self.channels[instance]
            .config
            .store(cfg.encode(), Ordering::SeqCst);
    }

    /// Raise events as the peer would
    pub fn raise(&self, instance: usize, events: Events) {
        self.channels[instance]
            .status
            .fetch_or(events.bits(), Ordering::SeqCst);
    }

    pub fn status(&self, instance: usize) -> Events {
        Events::from_bits_truncate(self.channels[instance].status.load(Ordering::SeqCst))
    }

    pub fn enable(&self, instance: usize) -> u32 {
        self.channels[instance].enable.load(Ordering::SeqCst)
    }

    pub fn set_enable(&self, instance: usize, value: u32) {
        self.channels[instance].enable.store(value, Ordering::SeqCst);
    }

    pub fn data_word(&self, instance: usize, word: usize) -> u32 {
        self.channels[instance].data[word].load(Ordering::SeqCst)
    }

    /// Fill the payload registers as the peer would
    pub fn put_payload(&self, instance: usize, payload: &[u8]) {
        assert!(payload.len() <= DATA_SIZE);
        for (i, chunk) in payload.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.channels[instance].data[i].store(u32::from_le_bytes(word), Ordering::SeqCst);
        }
    }

    /// Payload registers as bytes
    pub fn payload(&self, instance: usize) -> Vec<u8> {
        (0..DATA_REGS)
            .flat_map(|i| self.data_word(instance, i).to_le_bytes())
            .collect()
    }
}

impl RegisterBank for SimBank {
    fn read(&self, instance: usize, reg: Register) -> u32 {
        let chan = &self.channels[instance];
        match reg {
            Register::Config => chan.config.load(Ordering::SeqCst),
            Register::CauseClear | Register::StatusSet => chan.status.load(Ordering::SeqCst),
            Register::Enable => chan.enable.load(Ordering::SeqCst),
            Register::Data(i) => chan.data[i].load(Ordering::SeqCst),
        }
    }

    fn write(&self, instance: usize, reg: Register, value: u32) {
        let chan = &self.channels[instance];
        match reg {
            Register::Config => {
                let current = ChannelConfig::decode(chan.config.load(Ordering::SeqCst));
                let wanted = ChannelConfig::decode(value);
                if value == 0 || current.owner == 0 || current.owner == wanted.owner {
                    chan.config.store(value, Ordering::SeqCst);
                }
            }
            Register::CauseClear => {
                chan.status.fetch_and(!value, Ordering::SeqCst);
            }
            Register::StatusSet => {
                chan.status.fetch_or(value, Ordering::SeqCst);
            }
            Register::Enable => chan.enable.store(value, Ordering::SeqCst),
            Register::Data(i) => chan.data[i].store(value, Ordering::SeqCst),
        }
    }
}

static NEXT_TASK: AtomicU32 = AtomicU32::new(1);

std::thread_local! {
    static THREAD_TASK: Cell<u32> = const { Cell::new(0) };
}

/// Scheduler running tasks as std threads
pub struct ThreadScheduler {
    start: Instant,
    tasks: Mutex<HashMap<u32, Thread>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        ThreadScheduler {
            start: Instant::now(),
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn current_task(&self) -> TaskId {
        let raw = THREAD_TASK.with(|t| {
            if t.get() == 0 {
                t.set(NEXT_TASK.fetch_add(1, Ordering::SeqCst));
            }
            t.get()
        });
        self.tasks
            .lock()
            .unwrap()
            .entry(raw)
            .or_insert_with(thread::current);
        TaskId::new(raw).unwrap()
    }

    fn block(&self, timeout: Timeout) {
        match timeout {
            Timeout::Forever => thread::park(),
            Timeout::Millis(ms) => thread::park_timeout(Duration::from_millis(ms as u64)),
        }
    }

    fn unblock(&self, task: TaskId) -> Result<(), SchedError> {
        let tasks = self.tasks.lock().unwrap();
        let thread = tasks.get(&task.get()).ok_or(SchedError::InvalidTask)?;
        thread.unpark();
        Ok(())
    }

    fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Poll `cond` until it holds, failing the test after `limit`
pub fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < limit, "condition not reached in {:?}", limit);
        thread::sleep(Duration::from_millis(1));
    }
}
