//! Mailbox device: channel ownership and interrupt demultiplexing
//!
//! A mailbox is a bank of channels shared by several processor domains. Two
//! physical interrupt lines serve the whole bank: one for "data arrived"
//! (event A) and one for "peer acknowledged" (event B). Each side routes the
//! events it cares about to its own line by setting bits in the channel's
//! EVENT_ENABLE register; on interrupt the demultiplexer scans every channel
//! to find the ones that raised it.
//!
//! # Ownership
//!
//! A claimer that passes a non-zero `owner` writes CONFIG and reads it back.
//! The hardware only accepts the write if no other owner holds the slot, so a
//! mismatch means another domain got there first. A claimer with `owner == 0`
//! attaches to a channel someone else configured and only checks that the
//! configured source/destination are the ones it expects.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;

use log::{debug, error, warn};

use super::channel::{Channel, ChannelCallbacks, ChannelState};
use super::regs::{
    ChannelConfig, DATA_REGS, DATA_SIZE, Event, MAX_CHANNELS, MmioBank, Register, RegisterBank,
};
use crate::drivers::irqchip::{IrqController, IrqError, IrqHandler};
use crate::sync::in_interrupt;

/// Mailbox error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    /// Claim/release attempted from an interrupt handler
    CalledFromInterrupt,
    /// Channel already claimed on this side
    InUse,
    /// CONFIG write did not stick: another owner holds the channel
    NotOwner { owner: u8 },
    /// Configured source/destination differ from what the claimer expects
    Unsatisfied,
    /// Channel table allocation failed
    NoMemory,
    /// Interrupt handler installation failed
    Interrupt(IrqError),
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxError::CalledFromInterrupt => write!(f, "Called from interrupt context"),
            MailboxError::InUse => write!(f, "Channel in use"),
            MailboxError::NotOwner { owner } => write!(f, "Channel owned by {:#x}", owner),
            MailboxError::Unsatisfied => write!(f, "Source/destination mismatch"),
            MailboxError::NoMemory => write!(f, "Out of memory"),
            MailboxError::Interrupt(e) => write!(f, "Interrupt setup failed: {}", e),
        }
    }
}

impl From<IrqError> for MailboxError {
    fn from(e: IrqError) -> Self {
        MailboxError::Interrupt(e)
    }
}

/// Physical interrupt line plus the enable-bit index it is routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqLine {
    /// Controller line number
    pub line: u32,
    /// Index selecting this line's bits in EVENT_ENABLE
    pub index: u32,
}

/// Static description of one mailbox instance
#[derive(Debug, Clone, Copy)]
pub struct MailboxConfig {
    pub name: &'static str,
    pub base: usize,
    pub channels: usize,
    /// Line for event A (receive)
    pub receive_irq: IrqLine,
    /// Line for event B (ack)
    pub ack_irq: IrqLine,
}

/// Mailbox device
pub struct Mailbox {
    name: &'static str,
    base: usize,
    bank: Box<dyn RegisterBank>,
    channels: Vec<Channel>,
    receive_irq: IrqLine,
    ack_irq: IrqLine,
    irqs: Arc<dyn IrqController>,
    /// Handlers installed on `receive_irq` and `ack_irq`
    receive_handler: IrqHandler,
    ack_handler: IrqHandler,
}

impl Mailbox {
    /// Bring up a mailbox and install both interrupt handlers
    ///
    /// The handlers hold only a weak reference to the device; [`remove`]
    /// uninstalls them.
    ///
    /// [`remove`]: Mailbox::remove
    pub fn probe(
        config: MailboxConfig,
        bank: Box<dyn RegisterBank>,
        irqs: Arc<dyn IrqController>,
    ) -> Result<Arc<Self>, MailboxError> {
        assert!(
            config.channels <= MAX_CHANNELS,
            "{}: {} channels exceeds maximum of {}",
            config.name,
            config.channels,
            MAX_CHANNELS
        );

        debug!("MBOX: {}: probe", config.name);
        debug!("\tbase: {:#x}", config.base);
        debug!("\tirq_a: {} idx_a: {}", config.receive_irq.line, config.receive_irq.index);
        debug!("\tirq_b: {} idx_b: {}", config.ack_irq.line, config.ack_irq.index);

        let mut channels = Vec::new();
        channels
            .try_reserve_exact(config.channels)
            .map_err(|_| MailboxError::NoMemory)?;
        channels.extend((0..config.channels).map(Channel::new));

        let mbox = Arc::new_cyclic(|weak| Mailbox {
            name: config.name,
            base: config.base,
            bank,
            channels,
            receive_irq: config.receive_irq,
            ack_irq: config.ack_irq,
            irqs,
            receive_handler: Self::line_handler(weak.clone(), Event::Receive),
            ack_handler: Self::line_handler(weak.clone(), Event::Ack),
        });

        if let Err(e) = mbox.irqs.install(
            config.receive_irq.line,
            config.name,
            mbox.receive_handler.clone(),
        ) {
            error!("MBOX: {}: failed to install interrupt handler A: {}", config.name, e);
            return Err(e.into());
        }
        if let Err(e) =
            mbox.irqs
                .install(config.ack_irq.line, config.name, mbox.ack_handler.clone())
        {
            error!("MBOX: {}: failed to install interrupt handler B: {}", config.name, e);
            if let Err(e) = mbox.irqs.remove(config.receive_irq.line, &mbox.receive_handler) {
                error!("MBOX: {}: failed to remove interrupt handler A: {}", config.name, e);
            }
            return Err(e.into());
        }

        Ok(mbox)
    }

    /// Bring up a memory-mapped mailbox
    ///
    /// # Safety
    /// `config.base` must map `config.channels` channel register blocks for
    /// as long as the device exists.
    pub unsafe fn probe_mmio(
        config: MailboxConfig,
        irqs: Arc<dyn IrqController>,
    ) -> Result<Arc<Self>, MailboxError> {
        // SAFETY: Forwarded to the caller
        let bank = unsafe { MmioBank::new(config.base, config.channels) };
        Self::probe(config, Box::new(bank), irqs)
    }

    fn line_handler(mbox: Weak<Mailbox>, event: Event) -> IrqHandler {
        Arc::new(move || {
            if let Some(mbox) = mbox.upgrade() {
                debug!("MBOX: {}: ISR {:?}", mbox.name, event);
                mbox.handle_interrupt(event);
            }
        })
    }

    /// Release every channel and uninstall both interrupt handlers
    ///
    /// # Panics
    /// If a handler this device installed cannot be removed.
    pub fn remove(&self) -> Result<(), MailboxError> {
        if in_interrupt() {
            return Err(MailboxError::CalledFromInterrupt);
        }
        debug!("MBOX: {}: remove", self.name);

        for instance in 0..self.channels.len() {
            self.release(instance)?;
        }

        if let Err(e) = self.irqs.remove(self.receive_irq.line, &self.receive_handler) {
            panic!("MBOX: {}: failed to remove interrupt handler A: {}", self.name, e);
        }
        if let Err(e) = self.irqs.remove(self.ack_irq.line, &self.ack_handler) {
            panic!("MBOX: {}: failed to remove interrupt handler B: {}", self.name, e);
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// Number of channels in this device
    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn is_active(&self, instance: usize) -> bool {
        self.channel(instance).state.lock().active
    }

    /// Configuration currently held by the hardware
    pub fn config(&self, instance: usize) -> ChannelConfig {
        self.channel(instance);
        debug!("MBOX: {}: {}: read config", self.name, instance);
        ChannelConfig::decode(self.bank.read(instance, Register::Config))
    }

    fn channel(&self, instance: usize) -> &Channel {
        assert!(
            instance < self.channels.len(),
            "MBOX: {}: channel {} out of range",
            self.name,
            instance
        );
        &self.channels[instance]
    }

    fn line(&self, event: Event) -> IrqLine {
        match event {
            Event::Receive => self.receive_irq,
            Event::Ack => self.ack_irq,
        }
    }

    /// Claim a channel
    ///
    /// With `owner != 0` this side becomes the channel owner and configures
    /// it; otherwise it attaches to the existing configuration. Supplied
    /// callbacks are routed to this device's interrupt lines on success.
    pub fn claim(
        &self,
        instance: usize,
        owner: u8,
        source: u8,
        destination: u8,
        callbacks: ChannelCallbacks,
    ) -> Result<(), MailboxError> {
        let chan = self.channel(instance);
        debug!("MBOX: {}: {}: claim", self.name, instance);
        if in_interrupt() {
            return Err(MailboxError::CalledFromInterrupt);
        }

        let mut state = chan.state.lock();
        if state.active {
            return Err(MailboxError::InUse);
        }

        if owner != 0 {
            self.config_write(instance, owner, source, destination)?;
        } else {
            let hw = self.config(instance);
            if callbacks.ack.is_some() && source != 0 && hw.source != source {
                error!(
                    "MBOX: {}: failed to claim channel {}: src mismatch: {:#x} (expected {:#x})",
                    self.name, instance, hw.source, source
                );
                return Err(MailboxError::Unsatisfied);
            }
            if callbacks.receive.is_some() && destination != 0 && hw.destination != destination {
                error!(
                    "MBOX: {}: failed to claim channel {}: dest mismatch: {:#x} (expected {:#x})",
                    self.name, instance, hw.destination, destination
                );
                return Err(MailboxError::Unsatisfied);
            }
        }

        let mut val = 0;
        if callbacks.receive.is_some() {
            val |= Event::Receive.enable_bit(self.receive_irq.index);
        }
        if callbacks.ack.is_some() {
            val |= Event::Ack.enable_bit(self.ack_irq.index);
        }
        debug!("MBOX: {}: {}: enable interrupts", self.name, instance);
        let enable = self.bank.read(instance, Register::Enable);
        self.bank.write(instance, Register::Enable, enable | val);

        *state = ChannelState {
            callbacks,
            owner,
            source,
            destination,
            active: true,
        };
        Ok(())
    }

    fn config_write(
        &self,
        instance: usize,
        owner: u8,
        source: u8,
        destination: u8,
    ) -> Result<(), MailboxError> {
        let cfg = ChannelConfig::owned(owner, source, destination).encode();
        debug!("MBOX: {}: {}: write config", self.name, instance);
        self.bank.write(instance, Register::Config, cfg);

        let cfg_hw = self.bank.read(instance, Register::Config);
        if cfg_hw != cfg {
            let holder = ChannelConfig::decode(cfg_hw).owner;
            error!(
                "MBOX: {}: failed to write chan {} for {:#x}: already owned by {:#x}",
                self.name, instance, owner, holder
            );
            return Err(MailboxError::NotOwner { owner: holder });
        }
        Ok(())
    }

    /// Release a channel
    ///
    /// Disables both events on this device's lines and, if this side owns
    /// the channel, resets CONFIG. Clearing the owner also clears the
    /// destination, which returns the slot to its power-on state.
    pub fn release(&self, instance: usize) -> Result<(), MailboxError> {
        let chan = self.channel(instance);
        debug!("MBOX: {}: {}: release", self.name, instance);
        if in_interrupt() {
            return Err(MailboxError::CalledFromInterrupt);
        }

        let mut state = chan.state.lock();
        let mask =
            Event::Receive.enable_bit(self.receive_irq.index) | Event::Ack.enable_bit(self.ack_irq.index);
        let enable = self.bank.read(instance, Register::Enable);
        self.bank.write(instance, Register::Enable, enable & !mask);
        if state.owner != 0 {
            debug!("MBOX: {}: {}: reset config", self.name, instance);
            self.bank.write(instance, Register::Config, 0);
        }
        *state = ChannelState::default();
        Ok(())
    }

    /// Copy `buf` into the channel payload, zeroing the remaining registers
    ///
    /// # Panics
    /// If `buf` is larger than the channel payload.
    pub fn write(&self, instance: usize, buf: &[u8]) -> usize {
        self.channel(instance);
        assert!(
            buf.len() <= DATA_SIZE,
            "MBOX: {}: {}: write of {} bytes exceeds {}",
            self.name,
            instance,
            buf.len(),
            DATA_SIZE
        );
        debug!("MBOX: {}: {}: write", self.name, instance);

        let mut words = 0;
        for chunk in buf.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.bank
                .write(instance, Register::Data(words), u32::from_le_bytes(word));
            words += 1;
        }
        for i in words..DATA_REGS {
            self.bank.write(instance, Register::Data(i), 0);
        }

        buf.len()
    }

    /// Copy up to `buf.len()` payload bytes out of the channel
    ///
    /// Reads whole registers, stopping at the end of the payload region.
    /// `buf` may be smaller than the payload.
    pub fn read(&self, instance: usize, buf: &mut [u8]) -> usize {
        self.channel(instance);
        debug!("MBOX: {}: {}: read", self.name, instance);

        let mut copied = 0;
        for (i, dst) in buf.chunks_mut(4).take(DATA_REGS).enumerate() {
            let word = self.bank.read(instance, Register::Data(i)).to_le_bytes();
            dst.copy_from_slice(&word[..dst.len()]);
            copied += dst.len();
        }
        copied
    }

    /// Raise event A towards the peer
    pub fn event_set_receive(&self, instance: usize) {
        self.set_event(instance, Event::Receive);
    }

    /// Raise event B towards the peer
    pub fn event_set_ack(&self, instance: usize) {
        self.set_event(instance, Event::Ack);
    }

    pub fn event_clear_receive(&self, instance: usize) {
        self.clear_event(instance, Event::Receive);
    }

    pub fn event_clear_ack(&self, instance: usize) {
        self.clear_event(instance, Event::Ack);
    }

    fn set_event(&self, instance: usize, event: Event) {
        self.channel(instance);
        debug!("MBOX: {}: {}: raise {:?}", self.name, instance, event);
        self.bank
            .write(instance, Register::StatusSet, event.bits().bits());
    }

    fn clear_event(&self, instance: usize, event: Event) {
        self.channel(instance);
        debug!("MBOX: {}: {}: clear {:?}", self.name, instance, event);
        self.bank
            .write(instance, Register::CauseClear, event.bits().bits());
    }

    /// Is this channel the (or a) source of the `event` interrupt?
    ///
    /// Two criteria: the cause bit is set, and the event is routed to our line.
    fn is_subscribed(&self, instance: usize, state: &ChannelState, event: Event) -> bool {
        if !state.active {
            return false;
        }
        let cause = self.bank.read(instance, Register::CauseClear);
        if cause & event.bits().bits() == 0 {
            return false;
        }
        let enable = self.bank.read(instance, Register::Enable);
        enable & event.enable_bit(self.line(event).index) != 0
    }

    /// Demultiplex one interrupt of `event`'s line
    ///
    /// Runs the callback of every subscribed channel while holding that
    /// channel's lock. A subscribed channel without a callback for the event
    /// just has the event cleared, without acknowledging the peer. Returns
    /// the number of channels serviced.
    pub fn handle_interrupt(&self, event: Event) -> usize {
        let mut handled = 0;
        for chan in &self.channels {
            let state = chan.state.lock();
            if !self.is_subscribed(chan.instance, &state, event) {
                continue;
            }
            handled += 1;
            match state.callbacks.get(event) {
                Some(cb) => cb(),
                None => self.clear_event(chan.instance, event),
            }
        }
        if handled == 0 {
            warn!("MBOX: {}: no matching event for interrupt", self.name);
        }
        handled
    }
}
