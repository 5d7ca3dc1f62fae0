//!
//! The Cyphal/CAN transport: frame codec, transfer CRC, transmit queue, and receive reassembly
//!
//! This crate implements the mapping between application-level transfers
//! (`canadensis_core::transfer`) and the sequences of CAN/CAN-FD frames that carry them, as
//! described by the Cyphal/CAN transport specification. It does not talk to any particular CAN
//! peripheral; driver crates build on top of the types here.
//!

#![no_std]

extern crate alloc;

pub mod crc;
pub mod data;
pub mod queue;
pub mod rx;
pub mod tx;

pub use data::{CanId, Frame, FrameModel, IdKind, IdMetadata, Mtu, TransferKindFields};
pub use queue::{FrameQueueSource, FrameSink, OrderKey, TxQueue};
pub use rx::{cleanup_stale_transfers, ReceivedTransfer, Receiver, Subscription};
pub use tx::Transmitter;
