//! Request/reply links
//!
//! A [`Link`] is a named endpoint layered over a message [`Transport`]. It
//! offers fire-and-forget [`send`](Link::send) with ack tracking, and a
//! synchronous [`request`](Link::request) that sends a message, waits for
//! the peer to acknowledge it and then waits for the peer's reply.
//!
//! The transport calls back into the link from interrupt context:
//! [`on_ack`](Link::on_ack) when the peer consumed the last message,
//! [`on_receive_reply`](Link::on_receive_reply) when an answer arrives on a
//! client link, [`on_receive_command`](Link::on_receive_command) when an
//! unsolicited command arrives on a server link.
//!
//! ## Wakeups
//!
//! Callbacks never touch the requester's stack. They latch an ACK or REPLY
//! bit in the link, then wake whichever task is registered as requester.
//! The requester consumes the bits after waking, so an event that fires
//! before the task blocks (or before it registers at all) is still seen,
//! and an event that fires after the task gave up is simply left latched
//! until the next request clears it.
//!
//! One request per link at a time. Requests on different links are
//! independent.

pub mod command;
pub mod mailbox;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use log::{debug, error, info, warn};

use crate::drivers::mailbox::MailboxError;
use crate::sched::{Scheduler, TaskId, Timeout};
use crate::sync::Mutex;
use command::{COMMAND_SIZE, Command, CommandSink, Endpoint};

pub use command::CommandQueue;
pub use mailbox::{ChannelSpec, MailboxLinkConfig, MailboxTransport, Role, connect};

/// Link error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The transport refused the message
    SendFailed,
    /// The peer did not acknowledge the message in time
    AckTimeout,
    /// Underlying mailbox failure
    Transport(MailboxError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::SendFailed => write!(f, "Send failed"),
            LinkError::AckTimeout => write!(f, "Timed out waiting for ACK"),
            LinkError::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl From<MailboxError> for LinkError {
    fn from(e: MailboxError) -> Self {
        LinkError::Transport(e)
    }
}

/// Message transport underneath a link
///
/// `read` is called from interrupt context and must not block.
pub trait Transport: Send + Sync {
    /// Send `buf` to the peer, returning the bytes sent
    fn write(&self, buf: &[u8]) -> Result<usize, LinkError>;

    /// Consume the pending inbound message into `buf`, returning the bytes read
    fn read(&self, buf: &mut [u8]) -> Result<usize, LinkError>;

    fn close(&self) -> Result<(), LinkError>;
}

/// Per-link flag bits
///
/// `ACK` and `REPLY` are wakeup reasons latched for the requester. `TX_ACKED`
/// is the send state. An ack sets `TX_ACKED | ACK` in one update and a send
/// clears both in one update, so a latched `ACK` always reads back as acked.
mod signal {
    pub const ACK: u8 = 0x1;
    pub const REPLY: u8 = 0x2;
    pub const TX_ACKED: u8 = 0x4;
}

/// Where an inbound reply lands while a request is in flight
struct ReplySlot {
    armed: bool,
    data: Vec<u8>,
    read: usize,
}

/// State of the request in flight on one link
struct RequestContext {
    /// Raw `TaskId` of the waiting task, 0 when nobody waits
    requester: AtomicU32,
    flags: AtomicU8,
    reply: Mutex<ReplySlot>,
}

impl RequestContext {
    fn new() -> Self {
        RequestContext {
            requester: AtomicU32::new(0),
            flags: AtomicU8::new(0),
            reply: Mutex::new(ReplySlot {
                armed: false,
                data: Vec::new(),
                read: 0,
            }),
        }
    }

    fn take_signal(&self, bit: u8) -> bool {
        self.flags.fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }
}

/// Request/reply endpoint over transport `T`
pub struct Link<T: Transport> {
    name: &'static str,
    transport: T,
    ctx: RequestContext,
    scheduler: Arc<dyn Scheduler>,
    commands: Option<Arc<dyn CommandSink>>,
}

impl<T: Transport> Link<T> {
    /// Initialize a link with no request in flight
    ///
    /// `commands` receives unsolicited commands; only server links need one.
    pub fn new(
        name: &'static str,
        transport: T,
        scheduler: Arc<dyn Scheduler>,
        commands: Option<Arc<dyn CommandSink>>,
    ) -> Self {
        debug!("LINK: {}: init", name);
        Link {
            name,
            transport,
            ctx: RequestContext::new(),
            scheduler,
            commands,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a message without waiting
    ///
    /// Clears the ack flag and any latched ack first;
    /// [`is_send_acked`](Link::is_send_acked) reports when the peer has
    /// consumed the message.
    pub fn send(&self, buf: &[u8]) -> Result<usize, LinkError> {
        debug!("LINK: {}: send {} bytes", self.name, buf.len());
        self.ctx
            .flags
            .fetch_and(!(signal::TX_ACKED | signal::ACK), Ordering::SeqCst);
        self.transport.write(buf)
    }

    pub fn is_send_acked(&self) -> bool {
        self.ctx.flags.load(Ordering::SeqCst) & signal::TX_ACKED != 0
    }

    /// Close the transport
    pub fn disconnect(&self) -> Result<(), LinkError> {
        debug!("LINK: {}: disconnect", self.name);
        self.transport.close()
    }

    /// Send `msg` and wait for the peer's reply
    ///
    /// Waits up to `send_timeout` for the ack, then up to `reply_timeout`
    /// for the reply. Returns the reply length, `Ok(0)` if the ack arrived
    /// but no reply did, or an error if sending failed or was never acked.
    ///
    /// # Panics
    /// If the peer replies with an empty message.
    pub fn request(
        &self,
        send_timeout: Timeout,
        msg: &[u8],
        reply_timeout: Timeout,
        reply: &mut [u8],
    ) -> Result<usize, LinkError> {
        {
            let mut slot = self.ctx.reply.lock();
            slot.data.clear();
            slot.data.resize(reply.len(), 0);
            slot.read = 0;
            slot.armed = true;
        }
        self.ctx.flags.fetch_and(!signal::REPLY, Ordering::SeqCst);

        let result = match self.send(msg) {
            Ok(_) => {
                let me = self.scheduler.current_task();
                self.ctx.requester.store(me.get(), Ordering::SeqCst);
                let result = self.await_reply(send_timeout, reply_timeout, reply);
                self.ctx.requester.store(0, Ordering::SeqCst);
                result
            }
            Err(e) => {
                error!("LINK: {}: request: send failed: {}", self.name, e);
                Err(e)
            }
        };

        self.ctx.reply.lock().armed = false;
        result
    }

    fn await_reply(
        &self,
        send_timeout: Timeout,
        reply_timeout: Timeout,
        reply: &mut [u8],
    ) -> Result<usize, LinkError> {
        info!("LINK: {}: request: waiting for ACK", self.name);
        if !self.wait_for(signal::ACK, send_timeout) {
            error!("LINK: {}: request: timed out waiting for ACK", self.name);
            return Err(LinkError::AckTimeout);
        }
        assert!(
            self.is_send_acked(),
            "LINK: {}: request: ACK signalled but message not acked",
            self.name
        );

        info!("LINK: {}: request: waiting for reply", self.name);
        if !self.wait_for(signal::REPLY, reply_timeout) {
            warn!("LINK: {}: request: timed out waiting for reply", self.name);
            return Ok(0);
        }

        let slot = self.ctx.reply.lock();
        assert!(slot.read > 0, "LINK: {}: request: empty reply", self.name);
        reply[..slot.read].copy_from_slice(&slot.data[..slot.read]);
        info!("LINK: {}: request: reply of {} bytes", self.name, slot.read);
        Ok(slot.read)
    }

    /// Block until `bit` is latched or `timeout` passes
    fn wait_for(&self, bit: u8, timeout: Timeout) -> bool {
        let deadline = timeout.deadline(self.scheduler.uptime_ms());
        loop {
            if self.ctx.take_signal(bit) {
                return true;
            }
            let remaining = match deadline {
                None => Timeout::Forever,
                Some(deadline) => {
                    let now = self.scheduler.uptime_ms();
                    if now >= deadline {
                        return false;
                    }
                    Timeout::Millis(u32::try_from(deadline - now).unwrap_or(u32::MAX))
                }
            };
            self.scheduler.block(remaining);
        }
    }

    /// Latch `bits` and wake the requester, if any
    ///
    /// # Panics
    /// If the wakeup fails while the task is still registered as requester.
    fn signal(&self, bits: u8, what: &str) {
        self.ctx.flags.fetch_or(bits, Ordering::SeqCst);

        let raw = self.ctx.requester.load(Ordering::SeqCst);
        let Some(task) = TaskId::new(raw) else {
            return;
        };
        if let Err(e) = self.scheduler.unblock(task) {
            if self.ctx.requester.load(Ordering::SeqCst) == raw {
                panic!(
                    "LINK: {}: failed to send {} notification to task {}: {}",
                    self.name, what, raw, e
                );
            }
            warn!(
                "LINK: {}: {} for task {} arrived after it stopped waiting",
                self.name, what, raw
            );
        }
    }

    /// The peer consumed the last message sent on this link
    pub fn on_ack(&self) {
        debug!("LINK: {}: ACK", self.name);
        self.signal(signal::TX_ACKED | signal::ACK, "ACK");
    }

    /// A reply arrived for the request in flight
    pub fn on_receive_reply(&self) {
        debug!("LINK: {}: reply", self.name);
        {
            let mut guard = self.ctx.reply.lock();
            let slot = &mut *guard;
            if slot.armed {
                match self.transport.read(&mut slot.data) {
                    Ok(n) => slot.read = n,
                    Err(e) => {
                        error!("LINK: {}: failed to read reply: {}", self.name, e);
                        return;
                    }
                }
            } else {
                drop(guard);
                warn!("LINK: {}: dropping reply: no request in flight", self.name);
                if let Err(e) = self.transport.read(&mut []) {
                    error!("LINK: {}: failed to drain reply: {}", self.name, e);
                }
                return;
            }
        }
        self.signal(signal::REPLY, "reply");
    }
}

impl<T: Transport + 'static> Link<T> {
    /// An unsolicited command arrived: hand it to the command sink
    ///
    /// # Panics
    /// If the link has no command sink or the sink is full.
    pub fn on_receive_command(self: &Arc<Self>) {
        debug!("LINK: {}: command", self.name);
        let Some(commands) = self.commands.as_ref() else {
            panic!("LINK: {}: command received but no command sink", self.name);
        };

        let mut msg = [0u8; COMMAND_SIZE];
        if let Err(e) = self.transport.read(&mut msg) {
            error!("LINK: {}: failed to read command: {}", self.name, e);
            return;
        }

        let link: Arc<dyn Endpoint> = self.clone();
        if let Err(cmd) = commands.enqueue(Command { link, msg }) {
            panic!("LINK: {}: failed to enqueue command", cmd.link.name());
        }
    }
}

impl<T: Transport> Endpoint for Link<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn send(&self, buf: &[u8]) -> Result<usize, LinkError> {
        Link::send(self, buf)
    }

    fn is_send_acked(&self) -> bool {
        Link::is_send_acked(self)
    }
}
