//!
//! Breaking outgoing transfers into frames and queueing them for transmission
//!

mod breakdown;

use alloc::vec::Vec;

use canadensis_core::transfer::{Header, Transfer};
use canadensis_core::{CoreError, NodeId, OutOfMemoryError, Priority};

use crate::crc::TransferCrc;
use crate::data::{CanId, Frame, IdMetadata, Mtu, TransferKindFields, make_can_id, make_tail_byte, round_frame_payload_up};
use crate::queue::{OrderKey, TxQueue};
use crate::tx::breakdown::build_frames;

/// Splits outgoing transfers into frames and places them in a priority-ordered queue
///
/// Frame generation for a single transfer is all-or-nothing: `push()` either queues every frame
/// of the transfer or, if the queue does not have room for all of them, leaves the queue exactly
/// as it was before the call.
pub struct Transmitter<I> {
    queue: TxQueue<I>,
    transfer_count: u64,
    error_count: u64,
}

impl<I> Transmitter<I> {
    /// Creates a transmitter with the given frame queue capacity and MTU
    pub fn new(capacity: usize, mtu: Mtu) -> Self {
        Transmitter {
            queue: TxQueue::new(capacity, mtu),
            transfer_count: 0,
            error_count: 0,
        }
    }

    /// Returns the MTU used to break up future transfers
    pub fn mtu(&self) -> Mtu {
        self.queue.mtu()
    }

    /// Sets the MTU used to break up future transfers
    ///
    /// This does not affect frames already queued.
    pub fn set_mtu(&mut self, mtu: Mtu) {
        self.queue.set_mtu(mtu);
    }

    /// Breaks a transfer into frames and adds them to the queue
    ///
    /// Returns the number of frames generated. If the queue does not have room for every frame
    /// the transfer would produce, or the transfer's header is not valid (for example, a service
    /// transfer with no local node ID), no frames are queued and an error is returned.
    pub fn push<P>(&mut self, transfer: &Transfer<P, I>) -> Result<usize, CoreError>
    where
        P: AsRef<[u8]>,
        I: Clone,
    {
        match self.push_inner(&transfer.header, transfer.payload.as_ref()) {
            Ok(count) => {
                self.transfer_count = self.transfer_count.wrapping_add(1);
                Ok(count)
            }
            Err(e) => {
                self.error_count = self.error_count.wrapping_add(1);
                Err(e)
            }
        }
    }

    fn push_inner(&mut self, header: &Header<I>, payload: &[u8]) -> Result<usize, CoreError>
    where
        I: Clone,
    {
        let metadata = id_metadata(header);
        let local_node_id = header.source();
        let presentation_mtu = self.queue.mtu().presentation_capacity();
        let can_id = make_can_id(&metadata, payload, local_node_id, presentation_mtu)?;
        let timestamp = header.timestamp();
        let transfer_id = header.transfer_id();

        let frames = if payload.len() <= presentation_mtu {
            alloc::vec![single_frame(timestamp, can_id, payload, transfer_id)]
        } else {
            multi_frame(timestamp, can_id, payload, transfer_id, presentation_mtu)
        };

        let count = frames.len();
        self.queue
            .insert_transfer(u8::from(metadata.priority), frames)
            .map_err(CoreError::from)?;
        Ok(count)
    }

    /// Returns the key and a reference to the highest-priority queued frame, without removing it
    pub fn peek(&self) -> Option<(OrderKey, &Frame<I>)> {
        self.queue.peek()
    }

    /// Removes and returns the frame with the given key
    pub fn pop(&mut self, key: OrderKey) -> Option<Frame<I>> {
        self.queue.pop(key)
    }

    /// Returns a frame that could not be sent to the queue, to be retried before any frame
    /// queued after it
    pub fn return_frame(&mut self, priority: Priority, frame: Frame<I>) -> Result<(), OutOfMemoryError> {
        self.queue.return_frame(u8::from(priority), frame)
    }

    /// Returns the number of frames currently queued
    pub fn queue_len(&self) -> usize {
        self.queue.size()
    }

    /// Returns the number of transfers successfully broken into frames and queued
    pub fn transfer_count(&self) -> u64 {
        self.transfer_count
    }

    /// Returns the number of transfers that could not be queued
    pub fn error_count(&self) -> u64 {
        self.error_count
    }
}

fn id_metadata<I>(header: &Header<I>) -> IdMetadata {
    match header {
        Header::Message(message) => IdMetadata {
            priority: message.priority,
            kind: TransferKindFields::Message {
                subject: message.subject,
            },
        },
        Header::Request(service) => IdMetadata {
            priority: service.priority,
            kind: TransferKindFields::Request {
                service: service.service,
                destination: Some(service.destination),
            },
        },
        Header::Response(service) => IdMetadata {
            priority: service.priority,
            kind: TransferKindFields::Response {
                service: service.service,
                destination: Some(service.destination),
            },
        },
    }
}

/// Builds the single frame for a transfer whose payload fits in one frame: the whole payload,
/// zero-padded to its DLC bucket, with a tail byte that has the start-of-transfer,
/// end-of-transfer, and toggle bits all set
fn single_frame<I: Clone>(
    timestamp: I,
    id: CanId,
    payload: &[u8],
    transfer_id: canadensis_core::TransferId,
) -> Frame<I> {
    let mut data = Vec::with_capacity(round_frame_payload_up(payload.len() + 1));
    data.extend_from_slice(payload);
    let padded_len = round_frame_payload_up(data.len() + 1) - 1;
    data.resize(padded_len, 0);
    data.push(make_tail_byte(true, true, true, transfer_id));
    Frame::new(timestamp, id, &data)
}

/// Splits a payload that does not fit in one frame across several frames, appending the
/// transfer CRC (low byte first) before the final frame's padding
fn multi_frame<I: Clone>(
    timestamp: I,
    id: CanId,
    payload: &[u8],
    transfer_id: canadensis_core::TransferId,
    presentation_mtu: usize,
) -> Vec<Frame<I>> {
    let mut crc = TransferCrc::new();
    crc.add_all(payload);
    let crc_value = crc.get();
    // The worked examples in the transport specification transmit the transfer CRC low byte
    // first.
    let crc_bytes = [crc_value as u8, (crc_value >> 8) as u8];

    build_frames(payload, crc_bytes, presentation_mtu, transfer_id)
        .into_iter()
        .map(|(data, _)| Frame::new(timestamp.clone(), id, &data))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use canadensis_core::time::Microseconds64;
    use canadensis_core::transfer::MessageHeader;
    use canadensis_core::{Priority, SubjectId, TransferId};
    use core::convert::TryFrom;

    fn header(subject: u16, transfer_id: u8) -> Header<Microseconds64> {
        Header::Message(MessageHeader {
            timestamp: Microseconds64::new(0),
            transfer_id: TransferId::from_truncating(transfer_id),
            priority: Priority::Nominal,
            subject: SubjectId::try_from(subject).unwrap(),
            source: Some(NodeId::try_from(9).unwrap()),
        })
    }

    #[test]
    fn single_frame_transfer_queues_one_frame() {
        let mut tx: Transmitter<Microseconds64> = Transmitter::new(16, Mtu::Can8);
        let transfer = Transfer {
            header: header(100, 1),
            payload: &[1u8, 2, 3][..],
        };
        let count = tx.push(&transfer).unwrap();
        assert_eq!(1, count);
        assert_eq!(1, tx.queue_len());
        assert_eq!(1, tx.transfer_count());
    }

    /// Worked example: payload `0..=7` (8 bytes) with an 8-byte MTU splits into two frames, the
    /// second carrying the trailing payload byte and the CRC `0x178D` low byte first
    #[test]
    fn two_frame_split_matches_worked_example() {
        let mut tx: Transmitter<Microseconds64> = Transmitter::new(16, Mtu::Can8);
        let payload: Vec<u8> = (0u8..=7).collect();
        let transfer = Transfer {
            header: header(100, 22),
            payload: &payload[..],
        };
        tx.push(&transfer).unwrap();
        assert_eq!(2, tx.queue_len());

        let (key1, frame1) = tx.peek().unwrap();
        assert_eq!(&[0, 1, 2, 3, 4, 5, 6, 0b1010_0000 | 22], frame1.data());
        tx.pop(key1);
        let (_, frame2) = tx.peek().unwrap();
        assert_eq!(&[7, 0x8D, 0x17, 0b0100_0000 | 22], frame2.data());
    }

    #[test]
    fn capacity_exhausted_leaves_queue_untouched() {
        let mut tx: Transmitter<Microseconds64> = Transmitter::new(1, Mtu::Can8);
        let payload: Vec<u8> = (0u8..=60).collect();
        let transfer = Transfer {
            header: header(100, 5),
            payload: &payload[..],
        };
        assert!(tx.push(&transfer).is_err());
        assert_eq!(0, tx.queue_len());
        assert_eq!(1, tx.error_count());
    }

    #[test]
    fn anonymous_message_too_big_is_rejected() {
        let mut tx: Transmitter<Microseconds64> = Transmitter::new(16, Mtu::Can8);
        let payload = [0u8; 16];
        let transfer = Transfer {
            header: Header::Message(MessageHeader {
                timestamp: Microseconds64::new(0),
                transfer_id: TransferId::from_truncating(1),
                priority: Priority::Nominal,
                subject: SubjectId::try_from(1).unwrap(),
                source: None,
            }),
            payload: &payload[..],
        };
        assert!(tx.push(&transfer).is_err());
        assert_eq!(0, tx.queue_len());
    }
}
