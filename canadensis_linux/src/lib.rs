//!
//! A SocketCAN-backed implementation of the driver contract (`tx`/`rx`) consumed by the
//! transport core
//!
//! This crate is a thin adapter: it converts between [`canadensis_can::Frame`] and
//! `socketcan::CANFrame`, and between wall-clock time and [`Microseconds64`]. It contains no
//! transport logic of its own.
//!

use std::convert::TryFrom;
use std::io;
use std::time::Instant as StdInstant;

use socketcan::{CANFrame, CANSocket};

use canadensis_can::{CanId, Frame};
use canadensis_core::time::{Clock, Microseconds64, MicrosecondsDuration64};

/// A [`Clock`] backed by [`std::time::Instant`], producing [`Microseconds64`] timestamps
/// relative to when the clock was created
///
/// Cyphal timestamps only need to be internally consistent (for comparing two instants from the
/// same clock), so an arbitrary epoch is fine.
pub struct SystemClock {
    start: StdInstant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: StdInstant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    type Instant = Microseconds64;

    fn now(&mut self) -> Self::Instant {
        let elapsed = self.start.elapsed();
        Microseconds64::new(elapsed.as_micros() as u64)
    }
}

/// Wraps a SocketCAN socket, converting between its frame type and [`canadensis_can::Frame`]
pub struct LinuxCan {
    socket: CANSocket,
    clock: SystemClock,
}

impl LinuxCan {
    /// Wraps an already-configured socket (read/write timeouts, if any, are the caller's
    /// responsibility, matching the driver contract's explicit timeout parameter)
    pub fn new(socket: CANSocket) -> Self {
        LinuxCan {
            socket,
            clock: SystemClock::new(),
        }
    }

    /// Sends one frame
    ///
    /// Returns `Ok(())` on success. A `WouldBlock` error corresponds to the driver contract's
    /// "0 = timeout" return value; any other error is a transport error.
    pub fn send(&self, frame: Frame<Microseconds64>) -> io::Result<()> {
        let can_frame = CANFrame::new(u32::from(frame.id()), frame.data(), false, false)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.socket.write_frame(&can_frame)
    }

    /// Attempts to receive one frame without blocking longer than the socket's configured
    /// timeout
    ///
    /// Returns `Ok(None)` on a `WouldBlock`/timeout condition so that callers can poll without
    /// matching on `io::ErrorKind` themselves.
    pub fn receive(&mut self) -> io::Result<Option<Frame<Microseconds64>>> {
        match self.socket.read_frame() {
            Ok(can_frame) => {
                let timestamp = self.clock.now();
                let id = match CanId::try_from(can_frame.id()) {
                    Ok(id) => id,
                    Err(_) => {
                        log::debug!("dropping frame with out-of-range CAN ID {:#x}", can_frame.id());
                        return Ok(None);
                    }
                };
                Ok(Some(Frame::new(timestamp, id, can_frame.data())))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}
