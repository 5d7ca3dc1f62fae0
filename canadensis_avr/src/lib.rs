//!
//! A driver for the AT90CAN family of AVR microcontrollers' built-in CAN controller,
//! implementing the `tx`/`rx` driver contract consumed by the transport core
//!
//! The AT90CAN controller exposes 15 message object "mailboxes" through a shared bank of
//! memory-mapped registers (`CANPAGE` selects the active mailbox, `CANCDMOB`/`CANSTMOB`/`CANIDT*`
//! /`CANMSG` then address that mailbox's configuration and data). No AVR CAN HAL crate exists in
//! this project's dependency set, so mailbox access goes through the small [`MailboxRegisters`]
//! trait below instead of `embedded-hal`; a board support crate implements it over the real
//! memory-mapped registers.
//!

#![no_std]

use canadensis_can::{CanId, Frame};
use canadensis_core::time::Clock;
use core::convert::TryFrom;

/// The number of transmit/receive mailboxes on an AT90CAN controller
pub const MAILBOX_COUNT: u8 = 15;

/// Memory-mapped access to one AT90CAN mailbox's control and data registers
///
/// Implementations are expected to select the mailbox with `CANPAGE` before each call, as the
/// real register set is banked: only one mailbox's registers are visible at a time.
pub trait MailboxRegisters {
    /// Selects the active mailbox (`CANPAGE`, bits 4-7), `0..MAILBOX_COUNT`
    fn select(&mut self, mailbox: u8);

    /// True if the selected mailbox's `CONV` (conversation, i.e. "busy") bit is clear and it can
    /// accept a new frame to transmit
    fn tx_ready(&self) -> bool;

    /// True if the selected mailbox holds a fully received frame (`RXOK` set in `CANSTMOB`)
    fn rx_ready(&self) -> bool;

    /// Loads the selected mailbox's identifier, DLC, and data into the hardware registers and
    /// marks it for transmission (`CANCDMOB` = `CONMOB` transmit request)
    fn load_tx(&mut self, id: u32, data: &[u8]);

    /// Reads the selected mailbox's identifier and data, and clears its `RXOK` flag so it can
    /// receive again
    fn read_rx(&mut self, data_out: &mut [u8; 8]) -> (u32, usize);
}

/// Wraps a board's [`MailboxRegisters`] implementation, round-robining transmit requests across
/// mailboxes and scanning for a received frame on every poll
pub struct AvrCan<R, C> {
    registers: R,
    clock: C,
    next_tx_mailbox: u8,
    next_rx_mailbox: u8,
}

impl<R, C> AvrCan<R, C>
where
    R: MailboxRegisters,
    C: Clock,
{
    pub fn new(registers: R, clock: C) -> Self {
        AvrCan {
            registers,
            clock,
            next_tx_mailbox: 0,
            next_rx_mailbox: 0,
        }
    }

    /// Attempts to hand one frame to a free transmit mailbox
    ///
    /// Returns `Err(nb::Error::WouldBlock)` if every mailbox is currently busy transmitting,
    /// matching the driver contract's "0 = timeout"; this implementation has no other failure
    /// mode.
    pub fn transmit(&mut self, frame: &Frame<C::Instant>) -> nb::Result<(), core::convert::Infallible> {
        for offset in 0..MAILBOX_COUNT {
            let mailbox = (self.next_tx_mailbox + offset) % MAILBOX_COUNT;
            self.registers.select(mailbox);
            if self.registers.tx_ready() {
                self.registers.load_tx(u32::from(frame.id()), frame.data());
                self.next_tx_mailbox = (mailbox + 1) % MAILBOX_COUNT;
                return Ok(());
            }
        }
        Err(nb::Error::WouldBlock)
    }

    /// Scans the mailboxes for one that has finished receiving a frame
    ///
    /// Returns `Err(nb::Error::WouldBlock)` if no mailbox currently holds a received frame.
    /// Frames whose identifier does not fit in 29 bits (which should not occur on correctly
    /// configured hardware) are silently dropped, matching the transport specification's
    /// malformed-frame handling.
    pub fn receive(&mut self) -> nb::Result<Option<Frame<C::Instant>>, core::convert::Infallible> {
        for offset in 0..MAILBOX_COUNT {
            let mailbox = (self.next_rx_mailbox + offset) % MAILBOX_COUNT;
            self.registers.select(mailbox);
            if self.registers.rx_ready() {
                let mut data = [0u8; 8];
                let (raw_id, len) = self.registers.read_rx(&mut data);
                self.next_rx_mailbox = (mailbox + 1) % MAILBOX_COUNT;
                return Ok(CanId::try_from(raw_id).ok().map(|id| {
                    let timestamp = self.clock.now();
                    Frame::new(timestamp, id, &data[..len])
                }));
            }
        }
        Err(nb::Error::WouldBlock)
    }
}

#[cfg(test)]
extern crate alloc;
