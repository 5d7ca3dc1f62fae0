//!
//! The 29-bit CAN identifier, the tail byte, and the pure functions that map between them and a
//! structured frame model
//!

use core::convert::TryFrom;
use core::fmt;

use alloc::vec::Vec;

use canadensis_core::{InvalidArgumentError, NodeId, Priority, ServiceId, SubjectId, TransferId};

use crate::crc::transfer_crc;

/// A complete outgoing or incoming CAN frame: a timestamp, a 29-bit identifier, and up to 64
/// bytes of payload (the last byte of which is the tail byte on Cyphal frames)
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame<I> {
    timestamp: I,
    id: CanId,
    data: Vec<u8>,
}

impl<I> Frame<I> {
    /// Creates a frame, copying `data` into an owned buffer
    ///
    /// # Panics
    ///
    /// This panics if `data` is longer than 64 bytes.
    pub fn new(timestamp: I, id: CanId, data: &[u8]) -> Self {
        assert!(data.len() <= 64, "frame data exceeds the CAN-FD maximum");
        Frame {
            timestamp,
            id,
            data: Vec::from(data),
        }
    }

    pub fn timestamp(&self) -> I
    where
        I: Clone,
    {
        self.timestamp.clone()
    }

    pub fn id(&self) -> CanId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// The maximum value a 29-bit extended CAN identifier can hold
const CAN_ID_MAX: u32 = (1 << 29) - 1;

/// A validated 29-bit extended CAN identifier
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CanId(u32);

impl TryFrom<u32> for CanId {
    type Error = InvalidArgumentError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value <= CAN_ID_MAX {
            Ok(CanId(value))
        } else {
            Err(InvalidArgumentError)
        }
    }
}

impl From<CanId> for u32 {
    fn from(id: CanId) -> Self {
        id.0
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// The frame payload capacity (MTU), one of the standard CAN/CAN-FD DLC buckets
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(usize)]
pub enum Mtu {
    Can8 = 8,
    CanFd12 = 12,
    CanFd16 = 16,
    CanFd20 = 20,
    CanFd24 = 24,
    CanFd32 = 32,
    CanFd48 = 48,
    CanFd64 = 64,
}

impl Mtu {
    /// Returns the number of payload bytes this MTU holds, including the tail byte
    pub const fn frame_capacity(self) -> usize {
        self as usize
    }

    /// Returns the number of application payload bytes available in a frame of this MTU once
    /// the tail byte is subtracted
    pub const fn presentation_capacity(self) -> usize {
        self.frame_capacity() - 1
    }
}

impl From<Mtu> for usize {
    fn from(mtu: Mtu) -> Self {
        mtu as usize
    }
}

/// Maps an arbitrary payload length (including the tail byte) in `[0, 64]` to the smallest
/// standard DLC bucket that is greater than or equal to it
///
/// Lengths of 8 or less are returned unchanged: Classic CAN carries any length from 0 to 8
/// without padding. Lengths above 8 are rounded up to the next CAN-FD bucket
/// (12, 16, 20, 24, 32, 48, 64).
pub const fn round_frame_payload_up(n: usize) -> usize {
    if n <= 8 {
        n
    } else if n <= 12 {
        12
    } else if n <= 16 {
        16
    } else if n <= 20 {
        20
    } else if n <= 24 {
        24
    } else if n <= 32 {
        32
    } else if n <= 48 {
        48
    } else {
        64
    }
}

/// Packs the four tail byte fields into a single byte
///
/// The transfer ID is masked to its low 5 bits.
pub fn make_tail_byte(
    start_of_transfer: bool,
    end_of_transfer: bool,
    toggle: bool,
    transfer_id: TransferId,
) -> u8 {
    let mut byte = u8::from(transfer_id) & 0x1F;
    if toggle {
        byte |= 0x20;
    }
    if end_of_transfer {
        byte |= 0x40;
    }
    if start_of_transfer {
        byte |= 0x80;
    }
    byte
}

/// The fields packed into a frame's tail byte
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TailByte {
    pub start_of_transfer: bool,
    pub end_of_transfer: bool,
    pub toggle: bool,
    pub transfer_id: TransferId,
}

/// Unpacks a tail byte into its four fields
pub fn parse_tail_byte(byte: u8) -> TailByte {
    TailByte {
        start_of_transfer: byte & 0x80 != 0,
        end_of_transfer: byte & 0x40 != 0,
        toggle: byte & 0x20 != 0,
        transfer_id: TransferId::from_truncating(byte),
    }
}

/// The transfer-kind-specific fields carried in a CAN identifier
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IdKind {
    Message {
        subject: SubjectId,
        /// True if the source node has no assigned node ID
        anonymous: bool,
    },
    Request {
        service: ServiceId,
    },
    Response {
        service: ServiceId,
    },
}

/// The transfer-kind-specific fields needed to build a CAN identifier, before the source node ID
/// and anonymous pseudo-ID logic are applied
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransferKindFields {
    Message {
        subject: SubjectId,
    },
    Request {
        service: ServiceId,
        destination: Option<NodeId>,
    },
    Response {
        service: ServiceId,
        destination: Option<NodeId>,
    },
}

/// Metadata sufficient to build a CAN identifier for an outgoing transfer
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct IdMetadata {
    pub priority: Priority,
    pub kind: TransferKindFields,
}

/// A CAN frame decoded into its Cyphal fields, with the tail byte stripped from the payload
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameModel<'p> {
    pub priority: Priority,
    pub kind: IdKind,
    /// The sending node, or `None` for an anonymous message
    pub source: Option<NodeId>,
    /// The destination node for a service transfer; `None` for a message
    pub destination: Option<NodeId>,
    pub transfer_id: TransferId,
    pub start_of_transfer: bool,
    pub end_of_transfer: bool,
    pub toggle: bool,
    /// The frame payload with the tail byte removed
    pub payload: &'p [u8],
}

impl<'p> FrameModel<'p> {
    /// True if this frame is addressed to `local_node_id`, or is a broadcast message
    pub fn addressed_to(&self, local_node_id: Option<NodeId>) -> bool {
        match self.destination {
            None => true,
            Some(destination) => Some(destination) == local_node_id,
        }
    }
}

/// Builds the 29-bit extended CAN identifier for an outgoing transfer
///
/// `payload` is the full application payload of the transfer (used only to compute the
/// anonymous-message pseudo-source discriminator). `presentation_mtu` is the number of payload
/// bytes a single frame can hold once the tail byte is subtracted; it is used to reject an
/// anonymous message that would need more than one frame before any frame is allocated.
pub fn make_can_id(
    metadata: &IdMetadata,
    payload: &[u8],
    local_node_id: Option<NodeId>,
    presentation_mtu: usize,
) -> Result<CanId, InvalidArgumentError> {
    let mut bits: u32 = (u8::from(metadata.priority) as u32) << 26;

    match metadata.kind {
        TransferKindFields::Message { subject } => {
            if local_node_id.is_none() && payload.len() > presentation_mtu {
                // An anonymous message must fit into a single frame. Reject before any frame
                // is allocated.
                return Err(InvalidArgumentError);
            }
            let source = local_node_id.unwrap_or_else(|| pseudo_source_id(payload));
            bits |= u32::from(u8::from(source));
            bits |= (u32::from(u16::from(subject)) & 0x7FFF) << 8;
            if local_node_id.is_none() {
                bits |= 1 << 24;
            }
            // Bit 25 stays clear: this is a message.
        }
        TransferKindFields::Request {
            service,
            destination,
        }
        | TransferKindFields::Response {
            service,
            destination,
        } => {
            let source = local_node_id.ok_or(InvalidArgumentError)?;
            let destination = destination.ok_or(InvalidArgumentError)?;
            bits |= u32::from(u8::from(source));
            bits |= u32::from(u8::from(destination)) << 7;
            bits |= (u32::from(u16::from(service)) & 0x1FF) << 15;
            if matches!(metadata.kind, TransferKindFields::Request { .. }) {
                bits |= 1 << 24;
            }
            bits |= 1 << 25;
        }
    }

    Ok(CanId(bits))
}

/// Generates the anonymous-message pseudo-source node ID: the low 7 bits of the CRC-16 of the
/// payload
///
/// This must match exactly, or an anonymous node using this implementation will not
/// interoperate with one using a different implementation of the same rule.
pub fn pseudo_source_id(payload: &[u8]) -> NodeId {
    let crc = transfer_crc(payload);
    NodeId::from_truncating((crc & 0x7F) as u8)
}

/// Parses a received frame into a [`FrameModel`]
///
/// Returns `None` if the frame is not a valid Cyphal frame and should be silently dropped:
/// an empty payload (no tail byte), a nonzero reserved bit, a start-of-transfer frame with
/// toggle clear, or an anonymous frame that is not a single-frame transfer.
pub fn parse_frame<'p>(id: CanId, payload: &'p [u8]) -> Option<FrameModel<'p>> {
    if payload.is_empty() {
        return None;
    }
    let (data, tail) = payload.split_at(payload.len() - 1);
    let tail = parse_tail_byte(tail[0]);

    let bits = id.0;
    if bits & (1 << 7) != 0 {
        // Reserved bit 7 must be zero
        return None;
    }
    if tail.start_of_transfer && !tail.toggle {
        // v1 requires toggle = 1 at the start of every transfer
        return None;
    }

    let priority = Priority::try_from(((bits >> 26) & 0x7) as u8)
        .expect("3-bit field is always a valid priority");
    let source_bits = (bits & 0x7F) as u8;

    let is_service = bits & (1 << 25) != 0;
    let model = if is_service {
        let destination = NodeId::from_truncating(((bits >> 7) & 0x7F) as u8);
        let service = ServiceId::from_truncating(((bits >> 15) & 0x1FF) as u16);
        let is_request = bits & (1 << 24) != 0;
        let kind = if is_request {
            IdKind::Request { service }
        } else {
            IdKind::Response { service }
        };
        FrameModel {
            priority,
            kind,
            source: Some(NodeId::from_truncating(source_bits)),
            destination: Some(destination),
            transfer_id: tail.transfer_id,
            start_of_transfer: tail.start_of_transfer,
            end_of_transfer: tail.end_of_transfer,
            toggle: tail.toggle,
            payload: data,
        }
    } else {
        if bits & (1 << 23) != 0 {
            // Reserved bit 23 must be zero
            return None;
        }
        let anonymous = bits & (1 << 24) != 0;
        let subject = SubjectId::from_truncating(((bits >> 8) & 0x7FFF) as u16);
        if anonymous && !(tail.start_of_transfer && tail.end_of_transfer) {
            // Anonymous transfers must be single-frame
            return None;
        }
        FrameModel {
            priority,
            kind: IdKind::Message { subject, anonymous },
            source: if anonymous {
                None
            } else {
                Some(NodeId::from_truncating(source_bits))
            },
            destination: None,
            transfer_id: tail.transfer_id,
            start_of_transfer: tail.start_of_transfer,
            end_of_transfer: tail.end_of_transfer,
            toggle: tail.toggle,
            payload: data,
        }
    };
    Some(model)
}

#[cfg(test)]
mod test {
    use super::*;
    use canadensis_core::TransferKind;
    use core::convert::TryFrom as _;

    fn tk(model: &IdKind) -> TransferKind {
        match model {
            IdKind::Message { .. } => TransferKind::Message,
            IdKind::Request { .. } => TransferKind::Request,
            IdKind::Response { .. } => TransferKind::Response,
        }
    }

    #[test]
    fn round_frame_payload_up_identity_below_9() {
        for n in 0..=8 {
            assert_eq!(n, round_frame_payload_up(n));
        }
    }

    #[test]
    fn round_frame_payload_up_buckets() {
        assert_eq!(12, round_frame_payload_up(9));
        assert_eq!(12, round_frame_payload_up(12));
        assert_eq!(16, round_frame_payload_up(13));
        assert_eq!(64, round_frame_payload_up(49));
        assert_eq!(64, round_frame_payload_up(64));
    }

    #[test]
    fn round_frame_payload_up_monotonic_and_idempotent() {
        let mut previous = round_frame_payload_up(0);
        for n in 1..=64 {
            let value = round_frame_payload_up(n);
            assert!(value >= previous);
            assert_eq!(value, round_frame_payload_up(value));
            previous = value;
        }
    }

    #[test]
    fn tail_byte_round_trip() {
        for transfer_id in 0..32u8 {
            for &(sof, eof, toggle) in
                &[(true, true, true), (true, false, true), (false, true, false)]
            {
                let tid = TransferId::from_truncating(transfer_id);
                let byte = make_tail_byte(sof, eof, toggle, tid);
                let parsed = parse_tail_byte(byte);
                assert_eq!(sof, parsed.start_of_transfer);
                assert_eq!(eof, parsed.end_of_transfer);
                assert_eq!(toggle, parsed.toggle);
                assert_eq!(tid, parsed.transfer_id);
            }
        }
    }

    #[test]
    fn message_round_trip() {
        let metadata = IdMetadata {
            priority: Priority::Nominal,
            kind: TransferKindFields::Message {
                subject: SubjectId::try_from(321).unwrap(),
            },
        };
        let payload = [0u8, 1, 2, 3];
        let local = NodeId::try_from(10).unwrap();
        let id = make_can_id(&metadata, &payload, Some(local), 7).unwrap();

        let frame_payload = [0u8, 1, 2, 3, make_tail_byte(true, true, true, TransferId::from_truncating(5))];
        let model = parse_frame(id, &frame_payload).unwrap();
        assert_eq!(TransferKind::Message, tk(&model.kind));
        assert_eq!(Priority::Nominal, model.priority);
        assert_eq!(Some(local), model.source);
        assert_eq!(None, model.destination);
        match model.kind {
            IdKind::Message { subject, anonymous } => {
                assert_eq!(321u16, u16::from(subject));
                assert!(!anonymous);
            }
            _ => panic!("wrong kind"),
        }
    }

    #[test]
    fn service_round_trip() {
        let metadata = IdMetadata {
            priority: Priority::High,
            kind: TransferKindFields::Request {
                service: ServiceId::try_from(88).unwrap(),
                destination: Some(NodeId::try_from(20).unwrap()),
            },
        };
        let payload = [9u8];
        let local = NodeId::try_from(11).unwrap();
        let id = make_can_id(&metadata, &payload, Some(local), 7).unwrap();
        let frame_payload = [9u8, make_tail_byte(true, true, true, TransferId::from_truncating(1))];
        let model = parse_frame(id, &frame_payload).unwrap();
        assert_eq!(TransferKind::Request, tk(&model.kind));
        assert_eq!(Some(local), model.source);
        assert_eq!(Some(NodeId::try_from(20).unwrap()), model.destination);
    }

    #[test]
    fn service_requires_local_node_id() {
        let metadata = IdMetadata {
            priority: Priority::High,
            kind: TransferKindFields::Request {
                service: ServiceId::try_from(1).unwrap(),
                destination: Some(NodeId::try_from(2).unwrap()),
            },
        };
        assert!(make_can_id(&metadata, &[0], None, 7).is_err());
    }

    #[test]
    fn service_requires_destination() {
        let metadata = IdMetadata {
            priority: Priority::High,
            kind: TransferKindFields::Request {
                service: ServiceId::try_from(1).unwrap(),
                destination: None,
            },
        };
        let local = NodeId::try_from(2).unwrap();
        assert!(make_can_id(&metadata, &[0], Some(local), 7).is_err());
    }

    #[test]
    fn anonymous_multi_frame_rejected() {
        let metadata = IdMetadata {
            priority: Priority::Nominal,
            kind: TransferKindFields::Message {
                subject: SubjectId::try_from(1).unwrap(),
            },
        };
        let payload = [0u8; 16];
        // presentation_mtu of 7 means this 16-byte payload needs more than one frame
        assert!(make_can_id(&metadata, &payload, None, 7).is_err());
    }

    #[test]
    fn anonymous_uses_payload_crc_discriminator() {
        let metadata = IdMetadata {
            priority: Priority::Nominal,
            kind: TransferKindFields::Message {
                subject: SubjectId::try_from(1).unwrap(),
            },
        };
        let payload = [1u8, 2, 3];
        let id = make_can_id(&metadata, &payload, None, 7).unwrap();
        let expected_source = pseudo_source_id(&payload);
        assert_eq!(u8::from(expected_source), (u32::from(id) & 0x7F) as u8);
    }

    #[test]
    fn reject_empty_payload() {
        assert!(parse_frame(CanId::try_from(0).unwrap(), &[]).is_none());
    }

    #[test]
    fn reject_sof_without_toggle() {
        let frame_payload = [0u8, make_tail_byte(true, false, false, TransferId::from_truncating(0))];
        assert!(parse_frame(CanId::try_from(0).unwrap(), &frame_payload).is_none());
    }

    #[test]
    fn reject_reserved_bit_7() {
        let frame_payload = [0u8, make_tail_byte(true, true, true, TransferId::from_truncating(0))];
        let id = CanId::try_from(1 << 7).unwrap();
        assert!(parse_frame(id, &frame_payload).is_none());
    }
}
