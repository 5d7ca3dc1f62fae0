//!
//! A bxCAN-backed implementation of the driver contract (`tx`/`rx`) consumed by the transport
//! core, for STM32 microcontrollers with a bxCAN peripheral
//!
//! This crate is a thin, non-blocking adapter between [`bxcan::Can`] and
//! [`canadensis_can::Frame`]; it carries no transport logic. Filter bank programming is
//! delegated to `canadensis_filter_config`, since the bxCAN peripheral has only a handful of
//! filter banks (commonly 14), far fewer than the number of subjects and services a node may
//! subscribe to.
//!

#![no_std]

use bxcan::{Can, ExtendedId, Fifo, Frame as BxFrame, Id, Instance};
use canadensis_can::{CanId, Frame};
use canadensis_core::time::Clock;
use canadensis_filter_config::optimize;
use core::convert::TryFrom;

/// Wraps a configured bxCAN peripheral, converting between its frame type and
/// [`canadensis_can::Frame`]
///
/// `C` is a [`Clock`] used to stamp incoming frames; the bxCAN peripheral itself has no
/// timestamping of its own at this level.
pub struct BxCan<I, C> {
    can: Can<I>,
    clock: C,
}

impl<I, C> BxCan<I, C>
where
    I: Instance,
    C: Clock,
{
    /// Wraps an already-enabled bxCAN peripheral
    pub fn new(can: Can<I>, clock: C) -> Self {
        BxCan { can, clock }
    }

    /// Attempts to place one frame into a bxCAN transmit mailbox
    ///
    /// Returns `Ok(true)` if the frame was accepted, `Ok(false)` on `nb::Error::WouldBlock`
    /// (all mailboxes busy with higher- or equal-priority frames, matching the driver contract's
    /// "0 = timeout"), or the peripheral error otherwise.
    pub fn transmit(&mut self, frame: &Frame<C::Instant>) -> Result<bool, bxcan::Error<core::convert::Infallible>> {
        let id = ExtendedId::new(u32::from(frame.id())).expect("CanId is always a valid 29-bit value");
        let data = bxcan::Data::new(frame.data()).expect("frame payload never exceeds 8 bytes on Classic CAN");
        let bx_frame = BxFrame::new_data(Id::Extended(id), data);
        match self.can.transmit(&bx_frame) {
            Ok(_) => Ok(true),
            Err(nb::Error::WouldBlock) => Ok(false),
            Err(nb::Error::Other(e)) => Err(e),
        }
    }

    /// Attempts to receive one frame
    ///
    /// Returns `Ok(None)` on `nb::Error::WouldBlock` (no frame pending, matching the driver
    /// contract's "0 = timeout"); frames with a standard (11-bit) identifier are not valid
    /// Cyphal/CAN frames and are dropped with a debug log, matching the silent-drop error class
    /// of the transport specification.
    pub fn receive(&mut self) -> Result<Option<Frame<C::Instant>>, bxcan::Error<core::convert::Infallible>> {
        match self.can.receive() {
            Ok(bx_frame) => {
                let extended_id = match bx_frame.id() {
                    Id::Extended(id) => id.as_raw(),
                    Id::Standard(_) => {
                        log::debug!("dropping frame with an 11-bit standard identifier");
                        return Ok(None);
                    }
                };
                let id = CanId::try_from(extended_id).expect("bxcan::ExtendedId is always 29 bits or fewer");
                let data = bx_frame.data().map(|d| d.as_ref()).unwrap_or(&[]);
                let timestamp = self.clock.now();
                Ok(Some(Frame::new(timestamp, id, data)))
            }
            Err(nb::Error::WouldBlock) => Ok(None),
            Err(nb::Error::Other(e)) => Err(e),
        }
    }

    /// Returns a reference to the wrapped peripheral, for filter bank or interrupt configuration
    pub fn can_mut(&mut self) -> &mut Can<I> {
        &mut self.can
    }
}

/// Programs the bxCAN filter banks with the smallest set of identifier/mask filters (via
/// `canadensis_filter_config::optimize`) that accepts every identifier in `subscribed_ids`
///
/// `bank_count` is the number of filter banks available to this peripheral (commonly 14, or half
/// that when the banks are split between two CAN instances).
pub fn configure_filters<I: Instance>(can: &mut Can<I>, subscribed_ids: &[u32], bank_count: usize) {
    let filters = optimize(subscribed_ids, bank_count, 29);
    let mut filter_bank = can.modify_filters();
    filter_bank.clear();
    for (bank, filter) in filters.into_iter().enumerate() {
        if let Ok(id) = ExtendedId::new(filter.id()) {
            let mask = ExtendedId::new(filter.mask()).unwrap_or(id);
            filter_bank.enable_bank(
                bank as u8,
                Fifo::Fifo0,
                bxcan::filter::Mask32::frames_with_ext_id(id, mask),
            );
        }
    }
}
