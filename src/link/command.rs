//! Unsolicited command hand-off
//!
//! A server-side link does not interpret what it receives. The receive
//! callback copies the payload into a [`Command`] tagged with the link it
//! arrived on and passes it to a [`CommandSink`], normally a
//! [`CommandQueue`] drained by a dispatcher task. The dispatcher answers
//! through [`Endpoint`] without knowing what transport the link runs on.
//!
//! ## Ring layout
//!
//! Same shape as the socket RX/TX rings: `N` slots with one always left
//! empty so that `head == tail` means empty and `head + 1 == tail` means
//! full. The producer is an interrupt handler, so the ring is guarded by
//! the IRQ-disabling [`Mutex`] rather than left lock-free; there may be
//! more than one producer (one per server link).

use alloc::sync::Arc;
use core::fmt;

use super::LinkError;
use crate::sync::Mutex;

/// Size of the payload carried by one command
pub const COMMAND_SIZE: usize = 64;

/// Reply path back to the link a command arrived on
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &'static str;

    /// Send a reply; completion is reported by [`Endpoint::is_send_acked`]
    fn send(&self, buf: &[u8]) -> Result<usize, LinkError>;

    fn is_send_acked(&self) -> bool;
}

/// A received command and the link to answer on
pub struct Command {
    pub link: Arc<dyn Endpoint>,
    pub msg: [u8; COMMAND_SIZE],
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("link", &self.link.name())
            .field("msg", &&self.msg[..])
            .finish()
    }
}

/// Consumer of received commands
///
/// Called from interrupt context: must not block.
pub trait CommandSink: Send + Sync {
    /// Hand `cmd` over, giving it back if there is no room
    fn enqueue(&self, cmd: Command) -> Result<(), Command>;
}

struct Ring<const N: usize> {
    slots: [Option<Command>; N],
    head: usize,
    tail: usize,
}

/// Bounded FIFO of commands
///
/// Holds at most `N - 1` commands.
pub struct CommandQueue<const N: usize> {
    ring: Mutex<Ring<N>>,
}

impl<const N: usize> CommandQueue<N> {
    pub const fn new() -> Self {
        assert!(N >= 2, "command queue needs at least two slots");
        CommandQueue {
            ring: Mutex::new(Ring {
                slots: [const { None }; N],
                head: 0,
                tail: 0,
            }),
        }
    }

    /// Take the oldest command
    pub fn dequeue(&self) -> Option<Command> {
        let mut ring = self.ring.lock();
        if ring.head == ring.tail {
            return None;
        }
        let tail = ring.tail;
        let cmd = ring.slots[tail].take();
        ring.tail = (tail + 1) % N;
        cmd
    }

    pub fn len(&self) -> usize {
        let ring = self.ring.lock();
        (ring.head + N - ring.tail) % N
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N - 1
    }
}

impl<const N: usize> Default for CommandQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CommandSink for CommandQueue<N> {
    fn enqueue(&self, cmd: Command) -> Result<(), Command> {
        let mut ring = self.ring.lock();
        let head = ring.head;
        let next_head = (head + 1) % N;
        if next_head == ring.tail {
            return Err(cmd);
        }
        ring.slots[head] = Some(cmd);
        ring.head = next_head;
        Ok(())
    }
}
