//! Per-channel software state
//!
//! Locking enforces that a channel is never claimed or released while the
//! demultiplexer is deciding whether it raised an interrupt or is running its
//! callback. The lock covers this channel alone, so a slow callback on one
//! channel never delays claim/release of another.

use alloc::sync::Arc;

use super::regs::Event;
use crate::sync::Mutex;

/// Event callback, run in interrupt context with the channel lock held
///
/// Implementations must not block, allocate, or claim/release a channel.
/// They may read and write the channel's data and event registers.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Callbacks requested by a claimer
///
/// Supplying a callback also routes that event to this device's interrupt
/// line when the channel is claimed.
#[derive(Clone, Default)]
pub struct ChannelCallbacks {
    pub receive: Option<Callback>,
    pub ack: Option<Callback>,
}

impl ChannelCallbacks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn on_receive(mut self, cb: Callback) -> Self {
        self.receive = Some(cb);
        self
    }

    pub fn on_ack(mut self, cb: Callback) -> Self {
        self.ack = Some(cb);
        self
    }

    pub fn get(&self, event: Event) -> Option<&Callback> {
        match event {
            Event::Receive => self.receive.as_ref(),
            Event::Ack => self.ack.as_ref(),
        }
    }
}

/// Dynamic fields, set on claim and cleared on release
#[derive(Default)]
pub(super) struct ChannelState {
    pub callbacks: ChannelCallbacks,
    pub owner: u8,
    pub source: u8,
    pub destination: u8,
    pub active: bool,
}

/// One mailbox slot
pub(super) struct Channel {
    pub instance: usize,
    pub state: Mutex<ChannelState>,
}

impl Channel {
    pub fn new(instance: usize) -> Self {
        Channel {
            instance,
            state: Mutex::new(ChannelState::default()),
        }
    }
}
