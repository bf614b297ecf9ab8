//! Links over mailbox channels
//!
//! A mailbox link uses one channel to talk and one to listen (possibly the
//! same channel). Sending fills the `tx` payload and raises event A towards
//! the peer; the peer's event B on `tx` means it consumed the message.
//! Receiving drains the `rx` payload, clears event A and raises event B so
//! the peer knows its message was consumed.

use alloc::sync::{Arc, Weak};

use log::debug;

use super::command::CommandSink;
use super::{Link, LinkError, Transport};
use crate::drivers::mailbox::{Callback, ChannelCallbacks, DATA_SIZE, Mailbox};
use crate::sched::Scheduler;

/// Identity used when claiming one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    pub instance: usize,
    /// Non-zero to claim as owner and configure the channel
    pub owner: u8,
    pub source: u8,
    pub destination: u8,
}

/// What inbound messages on `rx` are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Replies to our requests
    Client,
    /// Unsolicited commands
    Server,
}

/// Mailbox link configuration
#[derive(Debug, Clone, Copy)]
pub struct MailboxLinkConfig {
    pub name: &'static str,
    pub tx: ChannelSpec,
    pub rx: ChannelSpec,
    pub role: Role,
}

/// [`Transport`] over a pair of mailbox channels
pub struct MailboxTransport {
    mbox: Arc<Mailbox>,
    tx: usize,
    rx: usize,
}

impl MailboxTransport {
    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mbox
    }
}

impl Transport for MailboxTransport {
    fn write(&self, buf: &[u8]) -> Result<usize, LinkError> {
        if buf.len() > DATA_SIZE {
            return Err(LinkError::SendFailed);
        }
        let n = self.mbox.write(self.tx, buf);
        self.mbox.event_set_receive(self.tx);
        Ok(n)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let n = self.mbox.read(self.rx, buf);
        self.mbox.event_clear_receive(self.rx);
        self.mbox.event_set_ack(self.rx);
        Ok(n)
    }

    fn close(&self) -> Result<(), LinkError> {
        self.mbox.release(self.rx)?;
        if self.tx != self.rx {
            self.mbox.release(self.tx)?;
        }
        Ok(())
    }
}

fn ack_callback(link: Weak<Link<MailboxTransport>>) -> Callback {
    Arc::new(move || {
        if let Some(link) = link.upgrade() {
            let t = link.transport();
            t.mbox.event_clear_ack(t.tx);
            link.on_ack();
        }
    })
}

fn receive_callback(link: Weak<Link<MailboxTransport>>, role: Role) -> Callback {
    Arc::new(move || {
        if let Some(link) = link.upgrade() {
            match role {
                Role::Client => link.on_receive_reply(),
                Role::Server => link.on_receive_command(),
            }
        }
    })
}

/// Open a link on `mbox` and claim its channels
///
/// Server links deliver inbound commands to `commands`.
///
/// # Panics
/// If a server link is opened without a command sink.
pub fn connect(
    mbox: Arc<Mailbox>,
    config: MailboxLinkConfig,
    scheduler: Arc<dyn Scheduler>,
    commands: Option<Arc<dyn CommandSink>>,
) -> Result<Arc<Link<MailboxTransport>>, LinkError> {
    assert!(
        config.role == Role::Client || commands.is_some(),
        "LINK: {}: server link needs a command sink",
        config.name
    );
    debug!(
        "LINK: {}: connect to {} tx {} rx {}",
        config.name,
        mbox.name(),
        config.tx.instance,
        config.rx.instance
    );

    let transport = MailboxTransport {
        mbox: mbox.clone(),
        tx: config.tx.instance,
        rx: config.rx.instance,
    };
    let link = Arc::new(Link::new(config.name, transport, scheduler, commands));
    let weak = Arc::downgrade(&link);

    let (tx, rx) = (config.tx, config.rx);
    let on_ack = ack_callback(weak.clone());
    let on_receive = receive_callback(weak, config.role);

    if tx.instance == rx.instance {
        mbox.claim(
            tx.instance,
            tx.owner,
            tx.source,
            tx.destination,
            ChannelCallbacks::none().on_ack(on_ack).on_receive(on_receive),
        )?;
        return Ok(link);
    }

    mbox.claim(
        tx.instance,
        tx.owner,
        tx.source,
        tx.destination,
        ChannelCallbacks::none().on_ack(on_ack),
    )?;
    if let Err(e) = mbox.claim(
        rx.instance,
        rx.owner,
        rx.source,
        rx.destination,
        ChannelCallbacks::none().on_receive(on_receive),
    ) {
        mbox.release(tx.instance)?;
        return Err(e.into());
    }

    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::irqchip::HandlerTable;
    use crate::drivers::mailbox::regs::{Events, Register, RegisterBank};
    use crate::drivers::mailbox::{ChannelConfig, IrqLine, MailboxConfig, MailboxError};
    use crate::link::CommandQueue;
    use crate::sched::Timeout;
    use crate::testing::{SimBank, ThreadScheduler, wait_until};
    use core::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    const RX_LINE: IrqLine = IrqLine { line: 66, index: 0 };
    const ACK_LINE: IrqLine = IrqLine { line: 67, index: 0 };

    struct Board {
        mbox: Arc<Mailbox>,
        bank: Arc<SimBank>,
        irqs: Arc<HandlerTable>,
    }

    impl Board {
        fn new() -> Self {
            let bank = Arc::new(SimBank::new(8));
            let irqs = Arc::new(HandlerTable::new());
            let config = MailboxConfig {
                name: "mbox0",
                base: 0x3000_a000,
                channels: 8,
                receive_irq: RX_LINE,
                ack_irq: ACK_LINE,
            };
            let mbox = Mailbox::probe(config, Box::new(bank.clone()), irqs.clone()).unwrap();
            Board { mbox, bank, irqs }
        }

        /// Peer consumes what we sent on `instance`
        fn peer_ack(&self, instance: usize) {
            self.bank
                .write(instance, Register::CauseClear, Events::RECEIVE.bits());
            self.bank.raise(instance, Events::ACK);
            assert!(self.irqs.dispatch(ACK_LINE.line));
        }

        /// Peer sends `msg` on `instance`
        fn peer_send(&self, instance: usize, msg: &[u8]) {
            self.bank.put_payload(instance, msg);
            self.bank.raise(instance, Events::RECEIVE);
            assert!(self.irqs.dispatch(RX_LINE.line));
        }
    }

    fn chan(instance: usize, owner: u8, source: u8, destination: u8) -> ChannelSpec {
        ChannelSpec {
            instance,
            owner,
            source,
            destination,
        }
    }

    fn client(board: &Board, tx: ChannelSpec, rx: ChannelSpec) -> Arc<Link<MailboxTransport>> {
        let config = MailboxLinkConfig {
            name: "client",
            tx,
            rx,
            role: Role::Client,
        };
        connect(
            board.mbox.clone(),
            config,
            Arc::new(ThreadScheduler::new()),
            None,
        )
        .unwrap()
    }

    fn when_waiting(link: &Arc<Link<MailboxTransport>>) {
        wait_until(Duration::from_secs(5), || {
            link.ctx.requester.load(Ordering::SeqCst) != 0
        });
    }

    #[test]
    fn test_request_over_single_channel() {
        let board = Arc::new(Board::new());
        let link = client(&board, chan(3, 1, 1, 2), chan(3, 1, 1, 2));
        assert_eq!(board.mbox.config(3), ChannelConfig::owned(1, 1, 2));

        let msg: Vec<u8> = (0..12).collect();
        let reply_msg: Vec<u8> = (100..120).collect();

        let peer = {
            let board = board.clone();
            let link = link.clone();
            let msg = msg.clone();
            let reply_msg = reply_msg.clone();
            thread::spawn(move || {
                when_waiting(&link);
                assert_eq!(&board.bank.payload(3)[..12], &msg[..]);
                assert!(board.bank.status(3).contains(Events::RECEIVE));

                board.peer_ack(3);
                wait_until(Duration::from_secs(5), || link.is_send_acked());
                thread::sleep(Duration::from_millis(20));
                board.peer_send(3, &reply_msg);
            })
        };

        let mut reply = [0u8; 20];
        let n = link
            .request(Timeout::Millis(500), &msg, Timeout::Millis(2000), &mut reply)
            .unwrap();
        peer.join().unwrap();

        assert_eq!(n, 20);
        assert_eq!(&reply[..], &reply_msg[..]);
        assert!(link.is_send_acked());
        // Reply consumed: receive cleared, peer acked
        assert_eq!(board.bank.status(3), Events::ACK);
    }

    #[test]
    fn test_request_without_peer_ack() {
        let board = Board::new();
        let link = client(&board, chan(0, 1, 1, 2), chan(1, 1, 2, 1));

        let mut reply = [0u8; 8];
        assert_eq!(
            link.request(Timeout::Millis(30), b"hello", Timeout::Millis(30), &mut reply),
            Err(LinkError::AckTimeout)
        );
        assert!(!link.is_send_acked());
    }

    #[test]
    fn test_request_acked_but_no_reply() {
        let board = Arc::new(Board::new());
        let link = client(&board, chan(0, 1, 1, 2), chan(1, 1, 2, 1));

        let peer = {
            let board = board.clone();
            let link = link.clone();
            thread::spawn(move || {
                when_waiting(&link);
                board.peer_ack(0);
            })
        };

        let mut reply = [0u8; 8];
        assert_eq!(
            link.request(Timeout::Millis(2000), b"hello", Timeout::Millis(30), &mut reply),
            Ok(0)
        );
        peer.join().unwrap();
        assert!(link.is_send_acked());
    }

    #[test]
    fn test_oversized_send_fails() {
        let board = Board::new();
        let link = client(&board, chan(0, 1, 1, 2), chan(1, 1, 2, 1));
        assert_eq!(link.send(&[0u8; DATA_SIZE + 1]), Err(LinkError::SendFailed));
    }

    #[test]
    fn test_server_link_queues_commands() {
        let board = Board::new();
        board.bank.force_config(5, ChannelConfig::owned(2, 2, 1));
        let queue = Arc::new(CommandQueue::<4>::new());
        let config = MailboxLinkConfig {
            name: "server",
            tx: chan(4, 1, 1, 2),
            rx: chan(5, 0, 2, 1),
            role: Role::Server,
        };
        let link = connect(
            board.mbox.clone(),
            config,
            Arc::new(ThreadScheduler::new()),
            Some(queue.clone() as Arc<dyn CommandSink>),
        )
        .unwrap();
        assert_eq!(link.transport().mailbox().name(), "mbox0");

        board.peer_send(5, b"reset");
        let cmd = queue.dequeue().unwrap();
        assert_eq!(cmd.link.name(), "server");
        assert_eq!(&cmd.msg[..5], b"reset");
        assert_eq!(board.bank.status(5), Events::ACK);

        // Answer on the originating link
        assert_eq!(cmd.link.send(b"done"), Ok(4));
        assert_eq!(&board.bank.payload(4)[..4], b"done");
        assert!(!cmd.link.is_send_acked());
        board.peer_ack(4);
        assert!(cmd.link.is_send_acked());
    }

    #[test]
    fn test_failed_rx_claim_releases_tx() {
        let board = Board::new();
        board.bank.force_config(1, ChannelConfig::owned(2, 2, 7));
        let config = MailboxLinkConfig {
            name: "client",
            tx: chan(0, 1, 1, 2),
            rx: chan(1, 0, 2, 1),
            role: Role::Client,
        };
        let result = connect(
            board.mbox.clone(),
            config,
            Arc::new(ThreadScheduler::new()),
            None,
        );
        assert!(matches!(
            result,
            Err(LinkError::Transport(MailboxError::Unsatisfied))
        ));
        assert!(!board.mbox.is_active(0));
        assert_eq!(board.mbox.config(0).owner, 0);
    }

    #[test]
    fn test_disconnect_releases_channels() {
        let board = Board::new();
        let link = client(&board, chan(2, 1, 1, 2), chan(6, 1, 2, 1));
        assert!(board.mbox.is_active(2) && board.mbox.is_active(6));

        link.disconnect().unwrap();
        assert!(!board.mbox.is_active(2));
        assert!(!board.mbox.is_active(6));
        assert_eq!(board.bank.enable(2), 0);
    }
}
